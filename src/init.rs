use crate::error::SinkError;
use crate::layer::SinkLayer;
use crate::transport::Transport;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the logging setup.
///
/// **Fields**
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
///   installed next to [`SinkLayer`] so events are also printed to the
///   console.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self { enable_stdout: true }
    }
}

/// Install a global `tracing` subscriber that routes events to
/// `transports`.
///
/// **Parameters**
/// - `transports`: sinks wrapped in [`Transport`]s; each one receives the
///   events its level admits.
/// - `config`: [`LayerConfig`] controlling console output.
///
/// **Errors**
///
/// Fails if a global subscriber is already installed.
pub fn init_logging_with_config(transports: Vec<Transport>, config: LayerConfig) -> Result<(), SinkError> {
    let layer = SinkLayer::new(transports);

    // The two branches build different subscriber types.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Install logging with [`LayerConfig::default`].
pub fn init_logging(transports: Vec<Transport>) -> Result<(), SinkError> {
    init_logging_with_config(transports, LayerConfig::default())
}
