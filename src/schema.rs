//! Destination table description and the insert statement rendered from it.
//!
//! The statement is rendered once when a sink is built; each delivery only
//! computes the bound values.

use crate::error::ConfigError;
use crate::record::{format_timestamp, LogRecord};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Name of the timestamp column added when the caller did not list one.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// SQL type of the implicit timestamp column.
pub const TIMESTAMP_TYPE: &str = "timestamp without time zone";

/// Record field (or constant) a column is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    Timestamp,
    Level,
    Message,
    Metadata,
    Constant(String),
}

impl FieldSource {
    /// Map a column name onto a record field, falling back to the sink's
    /// constant fields.
    pub fn infer(column: &str, constants: &BTreeMap<String, String>) -> Option<FieldSource> {
        match column.to_ascii_lowercase().as_str() {
            "timestamp" | "time" | "ts" => Some(FieldSource::Timestamp),
            "level" => Some(FieldSource::Level),
            "message" | "msg" | "error" => Some(FieldSource::Message),
            "meta" | "metadata" => Some(FieldSource::Metadata),
            _ => constants
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, value)| FieldSource::Constant(value.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub source: FieldSource,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, source: FieldSource) -> Self {
        Column {
            name: name.into(),
            data_type: data_type.into(),
            source,
        }
    }
}

/// Table name plus ordered columns. The first column is always bound to
/// the record timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    columns: Vec<Column>,
}

impl TableSchema {
    /// Validate names and types and put the timestamp column first,
    /// adding one when no column is bound to the timestamp.
    pub fn new(table: impl Into<String>, mut columns: Vec<Column>) -> Result<Self, ConfigError> {
        let table = table.into();
        for part in table.split('.') {
            validate_identifier(part)?;
        }

        let mut seen = HashSet::new();
        for column in &columns {
            validate_identifier(&column.name)?;
            validate_data_type(column)?;
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateColumn(column.name.clone()));
            }
        }

        match columns.iter().position(|c| c.source == FieldSource::Timestamp) {
            Some(0) => {}
            Some(index) => {
                let ts = columns.remove(index);
                columns.insert(0, ts);
            }
            None => {
                if seen.contains(TIMESTAMP_COLUMN) {
                    return Err(ConfigError::DuplicateColumn(TIMESTAMP_COLUMN.to_string()));
                }
                columns.insert(
                    0,
                    Column::new(TIMESTAMP_COLUMN, TIMESTAMP_TYPE, FieldSource::Timestamp),
                );
            }
        }

        Ok(TableSchema { table, columns })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Render the single-row insert for `dialect`.
    pub fn insert_statement(&self, dialect: Dialect) -> InsertStatement {
        let names = self
            .columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let params = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| dialect.placeholder(i + 1, &c.data_type))
            .collect::<Vec<_>>()
            .join(", ");

        InsertStatement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_table(&self.table),
                names,
                params
            ),
            bindings: self.columns.iter().map(|c| c.source.clone()).collect(),
        }
    }
}

/// Placeholder syntax of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `$n` parameters cast to the column type, all values sent as text.
    Postgres,
    /// `?n` parameters, values stored with the column's affinity.
    Sqlite,
}

impl Dialect {
    fn placeholder(&self, index: usize, data_type: &str) -> String {
        match self {
            Dialect::Postgres => format!("CAST(${} AS {})", index, data_type),
            Dialect::Sqlite => format!("?{}", index),
        }
    }
}

/// Field values of one record, already rendered to text.
#[derive(Debug, Clone)]
pub struct RowValues {
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub metadata: String,
}

impl RowValues {
    /// Render `record`, using the current time when it carries no
    /// timestamp. Metadata that cannot be encoded verbatim is written with
    /// placeholders; each substitution is logged.
    pub fn from_record(record: &LogRecord) -> Self {
        let timestamp = record.timestamp.unwrap_or_else(Utc::now);
        let encoded = record.metadata.encode();
        for issue in &encoded.issues {
            debug!(%issue, "metadata written with placeholder");
        }
        RowValues {
            timestamp: format_timestamp(&timestamp),
            level: record.level.to_string(),
            message: record.message.render(),
            metadata: encoded.value.to_string(),
        }
    }
}

/// Rendered insert plus the field bound to each parameter, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub sql: String,
    pub bindings: Vec<FieldSource>,
}

impl InsertStatement {
    /// Caller-supplied statement whose parameters 1..4 take the timestamp,
    /// level, message and metadata.
    pub fn custom(sql: impl Into<String>) -> Self {
        InsertStatement {
            sql: sql.into(),
            bindings: vec![
                FieldSource::Timestamp,
                FieldSource::Level,
                FieldSource::Message,
                FieldSource::Metadata,
            ],
        }
    }

    /// Parameter values for `row`, in binding order.
    pub fn values(&self, row: &RowValues) -> Vec<String> {
        self.bindings
            .iter()
            .map(|source| match source {
                FieldSource::Timestamp => row.timestamp.clone(),
                FieldSource::Level => row.level.clone(),
                FieldSource::Message => row.message.clone(),
                FieldSource::Metadata => row.metadata.clone(),
                FieldSource::Constant(value) => value.clone(),
            })
            .collect()
    }
}

fn validate_identifier(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.chars().any(|c| c == '\0' || c.is_control()) {
        return Err(ConfigError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

fn validate_data_type(column: &Column) -> Result<(), ConfigError> {
    let ok = !column.data_type.trim().is_empty()
        && column
            .data_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ',' | '[' | ']'));
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidDataType {
            column: column.name.clone(),
            data_type: column.data_type.clone(),
        })
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_table(table: &str) -> String {
    table.split('.').map(quote_identifier).collect::<Vec<_>>().join(".")
}
