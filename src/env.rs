//! Environment variable names used by this crate for convenient
//! configuration of sinks from services.
//!
//! These are purely helpers; [`resolve`](crate::config::resolve) itself
//! never reads the environment.

/// Connection string dedicated to log sinks. Checked first.
pub const LOG_SINK_DATABASE_URL_ENV: &str = "LOG_SINK_DATABASE_URL";

/// Generic connection string shared with the rest of the application.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Optional target table name.
pub const LOG_SINK_TABLE_ENV: &str = "LOG_SINK_TABLE";

/// Optional site tag written by [`SiteSink`](crate::site_sink::SiteSink).
pub const LOG_SINK_SITE_ENV: &str = "LOG_SINK_SITE";

/// First non-empty connection string from the environment.
pub fn database_url() -> Option<String> {
    [LOG_SINK_DATABASE_URL_ENV, DATABASE_URL_ENV]
        .into_iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|url| !url.trim().is_empty())
}
