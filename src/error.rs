use std::error::Error as StdError;

/// Fatal construction-time errors. A sink that fails with one of these is
/// never built.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("you have to define con_string or connection_string")]
    MissingConnectionString,

    #[error("invalid level: {0}")]
    InvalidLevel(#[from] crate::level::ParseLevelError),

    #[error("invalid SQL identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("invalid data type `{data_type}` for column `{column}`")]
    InvalidDataType { column: String, data_type: String },

    #[error("column `{0}` does not map to a record field or a constant")]
    UnmappedColumn(String),

    #[error("duplicate column `{0}`")]
    DuplicateColumn(String),

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("no backend for connection string scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("{0} feature is not enabled")]
    FeatureDisabled(&'static str),

    #[error("option `{0}` is not supported by this sink")]
    UnsupportedOption(&'static str),
}

/// Metadata could not be encoded verbatim. Recovered locally by writing a
/// placeholder in place of the offending branch.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    #[error("circular reference at {path}")]
    Cycle { path: String },

    #[error("nesting deeper than {limit} at {path}")]
    TooDeep { path: String, limit: usize },
}

/// Error reported by a [`Backend`](crate::backend::Backend).
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("failed to acquire connection")]
    Acquire(#[source] Box<dyn StdError + Send + Sync>),

    #[error("write failed")]
    Write(#[source] Box<dyn StdError + Send + Sync>),

    #[error("backend is closed")]
    Closed,
}

/// Per-record failure. Reported once through the delivery outcome, never
/// thrown into the caller and never retried.
#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error("sink `{sink}` failed to deliver")]
    Backend {
        sink: String,
        #[source]
        source: BackendError,
    },

    #[error("delivery task for sink `{0}` ended without reporting")]
    Aborted(String),
}

impl DeliveryError {
    /// Flatten the error and its source chain into one line, the form
    /// handed to callbacks and `Error` events.
    pub fn diagnostic(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}

/// Umbrella error for constructing sinks and transports.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("no Tokio runtime available to drive deliveries")]
    NoRuntime,

    #[error("failed to install global subscriber")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}
