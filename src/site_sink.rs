use crate::backend::{write_once, Backend};
use crate::config::{resolve, AdapterDefaults, ConnectionConfig, SinkConfig, SinkOptions};
use crate::error::{ConfigError, DeliveryError, SinkError};
use crate::level::Level;
use crate::record::{format_timestamp, LogRecord};
use crate::schema::{FieldSource, InsertStatement};
use crate::sink::LogSink;
use async_trait::async_trait;
use chrono::Utc;
use std::fmt;

#[cfg(any(feature = "postgres", feature = "sqlite"))]
use crate::backend::SqlBackend;

/// Site recorded when the options name none.
pub const DEFAULT_SITE: &str = "My Site";

/// Defaults of [`SiteSink`]: table `log` with
/// `timestamp, level, error, site` columns.
pub const SITE_SINK_DEFAULTS: AdapterDefaults = AdapterDefaults {
    name: "site-sink",
    table: "log",
    columns: &[
        ("level", "character varying"),
        ("error", "character varying"),
        ("site", "character varying"),
    ],
    site: Some(DEFAULT_SITE),
};

/// Per-record part of a [`SiteSink`] row. The site comes from the
/// statement's constant binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteEntry {
    pub time: String,
    pub level: String,
    pub error: String,
}

impl SiteEntry {
    fn values(&self, bindings: &[FieldSource]) -> Vec<String> {
        bindings
            .iter()
            .map(|source| match source {
                FieldSource::Timestamp => self.time.clone(),
                FieldSource::Level => self.level.clone(),
                FieldSource::Message => self.error.clone(),
                FieldSource::Constant(value) => value.clone(),
                // Rejected when the sink is built.
                FieldSource::Metadata => String::new(),
            })
            .collect()
    }
}

/// Sink that stores each record as a fixed-shape entry tagged with the
/// site it belongs to.
///
/// The message goes into the `error` column and metadata is not stored.
/// Every row carries the configured `site`, so several applications can
/// share one table.
pub struct SiteSink<B: Backend> {
    config: SinkConfig,
    site: String,
    statement: InsertStatement,
    backend: B,
}

impl<B: Backend> SiteSink<B> {
    pub fn with_backend<F>(options: &SinkOptions, build: F) -> Result<Self, SinkError>
    where
        F: FnOnce(&ConnectionConfig) -> Result<B, SinkError>,
    {
        if options.sql_statement.is_some() {
            return Err(ConfigError::UnsupportedOption("sql_statement").into());
        }
        let config = resolve(options, &SITE_SINK_DEFAULTS)?;
        if let Some(column) = config
            .schema
            .columns()
            .iter()
            .find(|c| c.source == FieldSource::Metadata)
        {
            return Err(ConfigError::UnmappedColumn(column.name.clone()).into());
        }

        let backend = build(&config.connection)?;
        let statement = config.schema.insert_statement(backend.dialect());
        let site = options.site.clone().unwrap_or_else(|| DEFAULT_SITE.to_string());
        Ok(SiteSink {
            config,
            site,
            statement,
            backend,
        })
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub fn statement(&self) -> &InsertStatement {
        &self.statement
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn entry(&self, record: &LogRecord) -> SiteEntry {
        SiteEntry {
            time: format_timestamp(&record.timestamp.unwrap_or_else(Utc::now)),
            level: record.level.to_string(),
            error: record.message.render(),
        }
    }
}

#[cfg(any(feature = "postgres", feature = "sqlite"))]
impl SiteSink<SqlBackend> {
    /// Build a sink whose backend is picked from the connection string
    /// scheme. The pool connects lazily on the first write.
    pub fn connect(options: &SinkOptions) -> Result<Self, SinkError> {
        Self::with_backend(options, SqlBackend::lazy)
    }
}

impl<B: Backend> fmt::Debug for SiteSink<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteSink")
            .field("name", &self.config.name)
            .field("site", &self.site)
            .field("table", &self.config.schema.table())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<B: Backend> LogSink for SiteSink<B> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn level(&self) -> Level {
        self.config.level
    }

    fn silent(&self) -> bool {
        self.config.silent
    }

    async fn write(&self, record: &LogRecord) -> Result<(), DeliveryError> {
        let values = self.entry(record).values(&self.statement.bindings);
        write_once(&self.backend, &self.statement.sql, &values)
            .await
            .map_err(|source| DeliveryError::Backend {
                sink: self.config.name.clone(),
                source,
            })
    }

    async fn close(&self) {
        self.backend.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::schema::Dialect;
    use crate::transport::Transport;

    fn build(options: SinkOptions, backend: &MemoryBackend) -> SiteSink<MemoryBackend> {
        let backend = backend.clone();
        SiteSink::with_backend(&options.connection_string("postgres://localhost/app"), move |_| Ok(backend))
            .unwrap()
    }

    #[tokio::test]
    async fn writes_level_error_and_site() {
        let backend = MemoryBackend::new(Dialect::Sqlite);
        let sink = build(SinkOptions::new().table("log").site("example.com"), &backend);
        assert_eq!(
            sink.statement().sql,
            "INSERT INTO \"log\" (\"timestamp\", \"level\", \"error\", \"site\") VALUES (?1, ?2, ?3, ?4)"
        );

        let transport = Transport::new(sink).unwrap();
        let record = transport.deliver(LogRecord::new(Level::Info, "started")).await.unwrap();

        assert_eq!(record.message.render(), "started");
        let writes = backend.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0].values[1..], ["info", "started", "example.com"]);
    }

    #[tokio::test]
    async fn column_names_match_regardless_of_case() {
        let backend = MemoryBackend::default();
        let options = SinkOptions {
            table_fields: Some(crate::config::ColumnList::Names("Level, Error, Site".to_string())),
            ..SinkOptions::new().site("example.com")
        };
        let transport = Transport::new(build(options, &backend)).unwrap();

        transport.deliver(LogRecord::new(Level::Warn, "slow")).await.unwrap();

        assert_eq!(&backend.writes()[0].values[1..], ["warn", "slow", "example.com"]);
    }

    #[test]
    fn site_defaults() {
        let sink = build(SinkOptions::new(), &MemoryBackend::default());
        assert_eq!(sink.site(), DEFAULT_SITE);
        assert_eq!(sink.config().name, "site-sink");
        assert_eq!(sink.config().schema.table(), "log");
    }

    #[test]
    fn metadata_columns_are_rejected() {
        let options = SinkOptions {
            table_fields: Some(crate::config::ColumnList::Names("level, error, meta".to_string())),
            ..SinkOptions::new().connection_string("postgres://localhost/app")
        };
        let err = SiteSink::with_backend(&options, |_| Ok(MemoryBackend::default())).unwrap_err();
        assert!(matches!(err, SinkError::Config(ConfigError::UnmappedColumn(name)) if name == "meta"));
    }

    #[test]
    fn custom_statement_is_rejected() {
        let options = SinkOptions {
            sql_statement: Some("INSERT INTO x VALUES ($1)".to_string()),
            ..SinkOptions::new().connection_string("postgres://localhost/app")
        };
        let err = SiteSink::with_backend(&options, |_| Ok(MemoryBackend::default())).unwrap_err();
        assert!(matches!(err, SinkError::Config(ConfigError::UnsupportedOption("sql_statement"))));
    }

    #[tokio::test]
    async fn failed_write_releases_handle() {
        let backend = MemoryBackend::default();
        backend.fail_writes("connection refused");
        let transport = Transport::new(build(SinkOptions::new(), &backend)).unwrap();

        let err = transport.deliver(LogRecord::new(Level::Error, "x")).await.unwrap_err();

        assert!(err.diagnostic().contains("connection refused"));
        assert_eq!(backend.acquired(), 1);
        assert_eq!(backend.released(), 1);
    }
}
