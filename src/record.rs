use crate::level::Level;
use crate::metadata::Metadata;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::error::Error;
use std::fmt;

/// One structured log event handed to a sink.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub level: Level,
    pub message: Message,
    pub metadata: Metadata,
    /// Set by the sink at write time when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<Message>) -> Self {
        LogRecord {
            level,
            message: message.into(),
            metadata: Metadata::default(),
            timestamp: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Metadata>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Timestamp of the record, stamping it with the current time first if
    /// it has none.
    pub fn stamp(&mut self) -> DateTime<Utc> {
        *self.timestamp.get_or_insert_with(Utc::now)
    }
}

/// Render a timestamp in the sortable text form stored by every sink:
/// RFC 3339, UTC, microsecond precision, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Log message: plain text or an error payload that may carry a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Text(String),
    Error { message: String, stack: Option<String> },
}

impl Message {
    /// Build an error payload from `err`; its `source()` chain becomes the
    /// stack, one cause per line.
    pub fn from_error(err: &(dyn Error + 'static)) -> Self {
        let mut frames = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            frames.push(format!("    caused by: {}", cause));
            source = cause.source();
        }
        Message::Error {
            message: err.to_string(),
            stack: (!frames.is_empty()).then(|| frames.join("\n")),
        }
    }

    /// Text stored in the message column. Errors with a stack store the
    /// message followed by the stack.
    pub fn render(&self) -> String {
        match self {
            Message::Text(text) => text.clone(),
            Message::Error { message, stack: None } => message.clone(),
            Message::Error {
                message,
                stack: Some(stack),
            } => format!("{}\n{}", message, stack),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Message::Text(value.to_string())
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Message::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("query failed")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn error_message_carries_source_chain_as_stack() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "socket closed"));
        let message = Message::from_error(&err);

        assert_eq!(message.render(), "query failed\n    caused by: socket closed");
    }

    #[test]
    fn stamp_keeps_existing_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut record = LogRecord::new(Level::Info, "hi").with_timestamp(ts);
        assert_eq!(record.stamp(), ts);
    }

    #[test]
    fn stamp_fills_missing_timestamp() {
        let mut record = LogRecord::new(Level::Info, "hi");
        let ts = record.stamp();
        assert_eq!(record.timestamp, Some(ts));
    }

    #[test]
    fn timestamps_format_sortably() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-05-01T12:00:00.000000Z");
    }
}
