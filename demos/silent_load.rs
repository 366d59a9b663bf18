use std::time::Instant;

use tokio::time::{sleep, Duration};
use tracing::error;

use tracing_sql_sink::config::SinkOptions;
use tracing_sql_sink::init::{init_logging_with_config, LayerConfig};
use tracing_sql_sink::memory::MemoryBackend;
use tracing_sql_sink::table_sink::TableSink;
use tracing_sql_sink::transport::Transport;

/// Measures layer overhead: one silent sink and one in-memory sink.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = SinkOptions::new().connection_string("postgres://localhost/load");

    let silent = TableSink::with_backend(&options.clone().silent(true), |_| Ok(MemoryBackend::default()))?;
    let backend = MemoryBackend::default();
    let recorded = {
        let backend = backend.clone();
        TableSink::with_backend(&options, move |_| Ok(backend))?
    };

    init_logging_with_config(
        vec![Transport::new(silent)?, Transport::new(recorded)?],
        LayerConfig { enable_stdout: false },
    )?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "load test error");
    }

    let elapsed = start.elapsed();
    println!(
        "emitted {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    // Let in-flight writes finish.
    sleep(Duration::from_secs(2)).await;
    println!("memory backend stored {} rows", backend.writes().len());
    Ok(())
}
