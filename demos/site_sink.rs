use tracing_sql_sink::config::SinkOptions;
use tracing_sql_sink::level::Level;
use tracing_sql_sink::record::{LogRecord, Message};
use tracing_sql_sink::site_sink::SiteSink;
use tracing_sql_sink::sqlite::SqliteBackend;
use tracing_sql_sink::transport::Transport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = SinkOptions::new()
        .connection_string("sqlite://site-log.db")
        .site("example.com");
    let sink = SiteSink::with_backend(&options, SqliteBackend::lazy)?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS log (timestamp TEXT NOT NULL, level TEXT, error TEXT, site TEXT)",
    )
    .execute(sink.backend().pool())
    .await?;
    let pool = sink.backend().pool().clone();

    let transport = Transport::new(sink)?;
    transport.log(LogRecord::new(Level::Info, "site started"), |outcome| match outcome {
        Ok(record) => println!("logged: {}", record.message),
        Err(diagnostic) => eprintln!("failed: {}", diagnostic),
    });

    let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "cdn timed out");
    transport
        .deliver(LogRecord::new(Level::Error, Message::from_error(&io)))
        .await?;

    let rows: Vec<(String, String, String, String)> =
        sqlx::query_as("SELECT timestamp, level, error, site FROM log ORDER BY timestamp")
            .fetch_all(&pool)
            .await?;
    for (timestamp, level, error, site) in rows {
        println!("{} [{}] {} ({})", timestamp, level, error, site);
    }

    transport.close().await;
    Ok(())
}
