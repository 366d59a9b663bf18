use crate::error::DeliveryError;
use crate::level::Level;
use crate::record::LogRecord;
use async_trait::async_trait;

/// Asynchronous destination for [`LogRecord`]s.
///
/// Implementations persist one record per [`write`](LogSink::write) call
/// to a concrete backend. Callers normally go through a
/// [`Transport`](crate::transport::Transport), which runs `write` on a
/// background task and never awaits it on the application thread.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Instance identifier, unique among the sinks of one application.
    fn name(&self) -> &str;

    /// Lowest severity this sink accepts. Filtering on it is the caller's
    /// job.
    fn level(&self) -> Level;

    /// When `true` the transport acknowledges records without calling
    /// [`write`](LogSink::write).
    fn silent(&self) -> bool {
        false
    }

    /// Persist a single record.
    ///
    /// **Parameters**
    /// - `record`: the record to store. Its timestamp is normally already
    ///   set; implementations use the current time when it is not.
    ///
    /// **Returns**
    /// - `Ok(())` once the backend accepted the write.
    /// - `Err(..)` if acquiring a connection or the write itself failed.
    ///   The failure is reported once and is not retried.
    ///
    /// Exactly one backend write is attempted per call.
    async fn write(&self, record: &LogRecord) -> Result<(), DeliveryError>;

    /// Release backend resources. Writes after `close` fail.
    ///
    /// Default implementation is a no-op.
    async fn close(&self) {}
}

/// Observability signal emitted once per non-silent delivery.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Logged { sink: String, record: LogRecord },
    Error { sink: String, diagnostic: String },
}
