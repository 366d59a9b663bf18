use crate::error::{DeliveryError, SinkError};
use crate::level::Level;
use crate::record::LogRecord;
use crate::sink::{LogSink, SinkEvent};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

/// Capacity of the per-transport event channel. Slow subscribers lag and
/// miss events; delivery itself is never slowed down by them.
const EVENT_CAPACITY: usize = 256;

/// Result of one delivery: the stamped record, or why it was not stored.
pub type Outcome = Result<LogRecord, DeliveryError>;

/// Facade-facing handle around a [`LogSink`].
///
/// [`deliver`](Transport::deliver) returns immediately; the write runs on
/// the Tokio runtime captured when the transport was built. Every
/// delivered record yields exactly one [`Outcome`] and, unless the sink is
/// silent, exactly one [`SinkEvent`].
#[derive(Clone)]
pub struct Transport {
    sink: Arc<dyn LogSink>,
    events: broadcast::Sender<SinkEvent>,
    runtime: Handle,
}

impl Transport {
    /// Wrap `sink`, capturing the current Tokio runtime.
    pub fn new(sink: impl LogSink + 'static) -> Result<Self, SinkError> {
        Self::from_arc(Arc::new(sink))
    }

    pub fn from_arc(sink: Arc<dyn LogSink>) -> Result<Self, SinkError> {
        let runtime = Handle::try_current().map_err(|_| SinkError::NoRuntime)?;
        Ok(Self::with_runtime(sink, runtime))
    }

    /// Wrap `sink`, running deliveries on `runtime`.
    pub fn with_runtime(sink: Arc<dyn LogSink>, runtime: Handle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Transport { sink, events, runtime }
    }

    pub fn name(&self) -> &str {
        self.sink.name()
    }

    pub fn level(&self) -> Level {
        self.sink.level()
    }

    /// Whether a record at `level` should be routed to this transport.
    pub fn enabled(&self, level: Level) -> bool {
        self.sink.level().admits(level)
    }

    /// Receive `Logged` / `Error` events for deliveries started after this
    /// call.
    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.events.subscribe()
    }

    /// Hand `record` to the sink without waiting for the backend.
    ///
    /// The returned [`Delivery`] resolves to the outcome; dropping it does
    /// not cancel the write.
    pub fn deliver(&self, mut record: LogRecord) -> Delivery {
        let (tx, rx) = oneshot::channel();
        let name = self.sink.name().to_string();

        if self.sink.silent() {
            let _ = tx.send(Ok(record));
            return Delivery { rx, sink: name };
        }

        let sink = Arc::clone(&self.sink);
        let events = self.events.clone();
        let task_name = name.clone();
        self.runtime.spawn(async move {
            let name = task_name;
            record.stamp();

            // The write runs in its own task so a panicking sink still
            // produces an outcome.
            let write = {
                let sink = Arc::clone(&sink);
                let record = record.clone();
                tokio::spawn(async move { sink.write(&record).await })
            };
            let result = match write.await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Aborted(name.clone())),
            };

            let outcome = match result {
                Ok(()) => {
                    let _ = events.send(SinkEvent::Logged {
                        sink: name,
                        record: record.clone(),
                    });
                    Ok(record)
                }
                Err(err) => {
                    let diagnostic = err.diagnostic();
                    debug!(sink = %name, error = %diagnostic, "log delivery failed");
                    let _ = events.send(SinkEvent::Error { sink: name, diagnostic });
                    Err(err)
                }
            };
            let _ = tx.send(outcome);
        });

        Delivery { rx, sink: name }
    }

    /// Callback form of [`deliver`](Transport::deliver).
    ///
    /// `callback` runs exactly once with the stored record or a diagnostic
    /// string. For a silent sink it runs before `log` returns.
    pub fn log<F>(&self, record: LogRecord, callback: F)
    where
        F: FnOnce(Result<LogRecord, String>) + Send + 'static,
    {
        if self.sink.silent() {
            callback(Ok(record));
            return;
        }

        let delivery = self.deliver(record);
        self.runtime.spawn(async move {
            callback(delivery.await.map_err(|e| e.diagnostic()));
        });
    }

    /// Close the underlying sink.
    pub async fn close(&self) {
        self.sink.close().await;
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("name", &self.sink.name())
            .field("level", &self.sink.level())
            .field("silent", &self.sink.silent())
            .finish()
    }
}

/// Pending outcome of [`Transport::deliver`].
#[must_use = "a Delivery does nothing unless awaited; drop it to ignore the outcome"]
pub struct Delivery {
    rx: oneshot::Receiver<Outcome>,
    sink: String,
}

impl Future for Delivery {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(DeliveryError::Aborted(self.sink.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
