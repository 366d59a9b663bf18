use crate::level::Level;
use crate::metadata::Metadata;
use crate::record::{LogRecord, Message};
use crate::transport::Transport;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Event targets never forwarded to transports: this crate's own
/// diagnostics and the SQL driver's query logging, either of which would
/// feed back into the sinks.
const IGNORED_TARGETS: &[&str] = &[env!("CARGO_CRATE_NAME"), "sqlx"];

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// hands them to every [`Transport`] whose level admits them.
///
/// Delivery is fire-and-forget: the layer never waits for a backend, and
/// outcomes are observable through each transport's event channel.
pub struct SinkLayer {
    transports: Vec<Transport>,
    /// Total events seen by the layer.
    pub total_events: Arc<AtomicU64>,
    /// Deliveries started, one per (event, transport) pair.
    pub delivered_events: Arc<AtomicU64>,
    /// Events no transport accepted.
    pub skipped_events: Arc<AtomicU64>,
}

impl SinkLayer {
    pub fn new(transports: Vec<Transport>) -> Self {
        SinkLayer {
            transports,
            total_events: Arc::new(AtomicU64::new(0)),
            delivered_events: Arc::new(AtomicU64::new(0)),
            skipped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn transports(&self) -> &[Transport] {
        &self.transports
    }
}

fn ignored(target: &str) -> bool {
    IGNORED_TARGETS
        .iter()
        .any(|prefix| target == *prefix || target.starts_with(&format!("{}::", prefix)))
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        if ignored(meta.target()) {
            return;
        }

        let level = Level::from(*meta.level());
        let targets: Vec<&Transport> = self.transports.iter().filter(|t| t.enabled(level)).collect();
        if targets.is_empty() {
            self.skipped_events.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let fields = Metadata::object();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor {
            fields: &fields,
            message: &mut message,
        };
        event.record(&mut visitor);

        fields.insert("target", meta.target());
        if let Some(module_path) = meta.module_path() {
            fields.insert("module_path", module_path);
        }
        if let Some(file) = meta.file() {
            fields.insert("file", file);
        }
        if let Some(line) = meta.line() {
            fields.insert("line", u64::from(line));
        }

        let record = LogRecord {
            level,
            message: Message::Text(message.unwrap_or_default()),
            metadata: fields,
            timestamp: Some(Utc::now()),
        };

        for transport in targets {
            // Outcomes surface through the transport's event channel.
            drop(transport.deliver(record.clone()));
            self.delivered_events.fetch_add(1, Ordering::Relaxed);
        }
    }
}

use tracing::field::{Field, Visit};

pub struct FieldVisitor<'a> {
    pub fields: &'a Metadata,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name(), value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name(), value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name(), value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name(), value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name(), value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields.insert(field.name(), Message::from_error(value).render());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name(), format!("{:?}", value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::sink::SinkEvent;
    use crate::table_sink::TableSink;
    use crate::config::SinkOptions;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    fn transport(level: &str, backend: &MemoryBackend) -> Transport {
        let backend = backend.clone();
        let options = SinkOptions {
            level: Some(level.to_string()),
            ..SinkOptions::new().connection_string("postgres://localhost/app")
        };
        Transport::new(TableSink::with_backend(&options, move |_| Ok(backend)).unwrap()).unwrap()
    }

    #[test]
    fn ignores_own_and_driver_targets() {
        assert!(ignored("sqlx::query"));
        assert!(ignored(env!("CARGO_CRATE_NAME")));
        assert!(!ignored("sqlx_like_app"));
        assert!(!ignored("my_app::orders"));
    }

    #[tokio::test]
    async fn routes_events_by_level() {
        let errors = MemoryBackend::default();
        let everything = MemoryBackend::default();
        let error_transport = transport("error", &errors);
        let debug_transport = transport("debug", &everything);
        let mut error_events = error_transport.subscribe();
        let mut debug_events = debug_transport.subscribe();

        let layer = SinkLayer::new(vec![error_transport, debug_transport]);
        let skipped = Arc::clone(&layer.skipped_events);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "shop::orders", order_id = 7, "order created");
            tracing::error!(target: "shop::orders", order_id = 7, "order failed");
            tracing::trace!(target: "shop::orders", "too chatty for anyone");
        });

        let wait = Duration::from_secs(5);
        for _ in 0..2 {
            let event = tokio::time::timeout(wait, debug_events.recv()).await.unwrap().unwrap();
            assert!(matches!(event, SinkEvent::Logged { .. }));
        }
        match tokio::time::timeout(wait, error_events.recv()).await.unwrap().unwrap() {
            SinkEvent::Logged { record, .. } => {
                assert_eq!(record.level, Level::Error);
                assert_eq!(record.message.render(), "order failed");
                assert_eq!(record.metadata.get("order_id").unwrap().to_json_string(), "7");
                assert_eq!(record.metadata.get("target").unwrap().to_json_string(), r#""shop::orders""#);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(errors.writes().len(), 1);
        assert_eq!(everything.writes().len(), 2);
        assert_eq!(skipped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn drops_events_from_own_crate_and_driver() {
        let backend = MemoryBackend::default();
        let layer = SinkLayer::new(vec![transport("debug", &backend)]);
        let total = Arc::clone(&layer.total_events);
        let delivered = Arc::clone(&layer.delivered_events);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("emitted from inside the crate");
            tracing::error!(target: "sqlx::query", "select 1");
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(total.load(Ordering::Relaxed), 2);
        assert_eq!(delivered.load(Ordering::Relaxed), 0);
        assert_eq!(backend.acquired(), 0);
    }
}
