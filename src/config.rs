//! Raw sink options and their one-time resolution into a [`SinkConfig`].

use crate::env;
use crate::error::ConfigError;
use crate::level::Level;
use crate::schema::{Column, FieldSource, TableSchema, TIMESTAMP_TYPE};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Options as supplied by the application, before defaults are applied.
///
/// Deserializes from JSON and accepts the camelCase spellings
/// (`conString`, `tableName`, `poolConfig`, ...) as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SinkOptions {
    pub name: Option<String>,
    pub level: Option<String>,
    pub silent: bool,
    /// Legacy nested table settings. Wins over the flat fields.
    #[serde(alias = "tableConfig")]
    pub table_config: Option<TableConfig>,
    #[serde(alias = "tableName", alias = "table")]
    pub table_name: Option<String>,
    #[serde(alias = "tableFields")]
    pub table_fields: Option<ColumnList>,
    /// Legacy alias of `connection_string`.
    #[serde(alias = "conString")]
    pub con_string: Option<String>,
    #[serde(alias = "connectionString")]
    pub connection_string: Option<String>,
    #[serde(alias = "poolConfig")]
    pub pool_config: PoolSettings,
    /// Replaces the generated insert; parameters 1..4 receive timestamp,
    /// level, message and metadata.
    #[serde(alias = "sqlStatement")]
    pub sql_statement: Option<String>,
    /// Constant stored in a `site` column.
    pub site: Option<String>,
    /// Constant stored in a `label` column.
    pub label: Option<String>,
    /// Further constant columns.
    pub constants: BTreeMap<String, String>,
}

impl SinkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_string(mut self, url: impl Into<String>) -> Self {
        self.connection_string = Some(url.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    pub fn site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Fill unset options from the environment: the connection string
    /// ([`env::LOG_SINK_DATABASE_URL_ENV`], then [`env::DATABASE_URL_ENV`]),
    /// the table and the site tag. Explicit options always win.
    pub fn merge_env(mut self) -> Self {
        if self.con_string.is_none() && self.connection_string.is_none() {
            self.connection_string = env::database_url();
        }
        if self.table_name.is_none() {
            self.table_name = std::env::var(env::LOG_SINK_TABLE_ENV).ok();
        }
        if self.site.is_none() {
            self.site = std::env::var(env::LOG_SINK_SITE_ENV).ok();
        }
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    #[serde(alias = "tableName")]
    pub table_name: Option<String>,
    #[serde(alias = "tableFields")]
    pub table_fields: Option<ColumnList>,
}

/// Column list given either as structured entries or as a comma-separated
/// string of names.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ColumnList {
    Specs(Vec<ColumnSpec>),
    Names(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default, alias = "dataType")]
    pub data_type: Option<String>,
}

impl ColumnList {
    fn into_specs(self) -> Vec<ColumnSpec> {
        match self {
            ColumnList::Specs(specs) => specs,
            ColumnList::Names(names) => names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| ColumnSpec {
                    name: name.to_string(),
                    data_type: None,
                })
                .collect(),
        }
    }
}

/// Pool sizing and timeouts handed to the backend driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    #[serde(alias = "max", alias = "maxConnections")]
    pub max_connections: u32,
    #[serde(alias = "min", alias = "minConnections")]
    pub min_connections: u32,
    #[serde(alias = "connectionTimeoutMillis", alias = "acquireTimeoutMs")]
    pub acquire_timeout_ms: Option<u64>,
    #[serde(alias = "idleTimeoutMillis", alias = "idleTimeoutMs")]
    pub idle_timeout_ms: Option<u64>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_ms: None,
            idle_timeout_ms: None,
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

/// Connection string plus pool settings.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub url: String,
    pub pool: PoolSettings,
}

impl ConnectionConfig {
    /// URL scheme, e.g. `postgres` or `sqlite`.
    pub fn scheme(&self) -> &str {
        self.url.split(':').next().unwrap_or_default()
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The URL may embed credentials.
        f.debug_struct("ConnectionConfig")
            .field("scheme", &self.scheme())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Per-adapter defaults consulted by [`resolve`].
#[derive(Debug, Clone, Copy)]
pub struct AdapterDefaults {
    pub name: &'static str,
    pub table: &'static str,
    /// `(name, data_type)` pairs used when the options list no columns.
    pub columns: &'static [(&'static str, &'static str)],
    pub site: Option<&'static str>,
}

/// Immutable configuration of one sink instance.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub name: String,
    pub level: Level,
    pub silent: bool,
    pub schema: TableSchema,
    pub connection: ConnectionConfig,
    pub sql_statement: Option<String>,
}

/// Resolve `options` against `defaults`. Performs no I/O.
pub fn resolve(options: &SinkOptions, defaults: &AdapterDefaults) -> Result<SinkConfig, ConfigError> {
    let url = [options.con_string.as_deref(), options.connection_string.as_deref()]
        .into_iter()
        .flatten()
        .find(|url| !url.trim().is_empty())
        .ok_or(ConfigError::MissingConnectionString)?;

    let level = match options.level.as_deref() {
        Some(label) => label.parse()?,
        None => Level::default(),
    };

    let mut constants = options.constants.clone();
    if let Some(site) = options.site.as_deref().or(defaults.site) {
        constants.insert("site".to_string(), site.to_string());
    }
    if let Some(label) = &options.label {
        constants.insert("label".to_string(), label.clone());
    }

    let nested = options.table_config.clone().unwrap_or_default();
    let table = nested
        .table_name
        .or_else(|| options.table_name.clone())
        .unwrap_or_else(|| defaults.table.to_string());

    let specs = match nested.table_fields.or_else(|| options.table_fields.clone()) {
        Some(list) => list.into_specs(),
        None => defaults
            .columns
            .iter()
            .map(|(name, data_type)| ColumnSpec {
                name: name.to_string(),
                data_type: Some(data_type.to_string()),
            })
            .collect(),
    };

    let columns = specs
        .into_iter()
        .map(|spec| {
            let source = FieldSource::infer(&spec.name, &constants)
                .ok_or_else(|| ConfigError::UnmappedColumn(spec.name.clone()))?;
            let data_type = spec.data_type.unwrap_or_else(|| default_data_type(&source).to_string());
            Ok(Column::new(spec.name, data_type, source))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(SinkConfig {
        name: options
            .name
            .clone()
            .unwrap_or_else(|| defaults.name.to_string()),
        level,
        silent: options.silent,
        schema: TableSchema::new(table, columns)?,
        connection: ConnectionConfig {
            url: url.to_string(),
            pool: options.pool_config.clone(),
        },
        sql_statement: options.sql_statement.clone(),
    })
}

fn default_data_type(source: &FieldSource) -> &'static str {
    match source {
        FieldSource::Timestamp => TIMESTAMP_TYPE,
        FieldSource::Metadata => "json",
        _ => "character varying",
    }
}
