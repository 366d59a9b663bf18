//! SQLite backend using sqlx.

use crate::backend::Backend;
use crate::config::ConnectionConfig;
use crate::error::{BackendError, ConfigError, SinkError};
use crate::schema::Dialect;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;
use std::fmt;
use std::str::FromStr;

/// SQLite backend over a `sqlx` pool.
///
/// File databases run in WAL mode and are created if missing.
/// `sqlite::memory:` gives a private in-memory database shared by all
/// connections of this pool.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Build the pool without connecting. Must be called inside a Tokio
    /// runtime.
    pub fn lazy(config: &ConnectionConfig) -> Result<Self, SinkError> {
        tokio::runtime::Handle::try_current().map_err(|_| SinkError::NoRuntime)?;

        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| ConfigError::InvalidConnectionString(e.to_string()))?
            .create_if_missing(true);
        if !config.url.contains(":memory:") {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool = SqlitePoolOptions::new()
            .max_connections(config.pool.max_connections.max(1))
            .min_connections(config.pool.min_connections)
            .idle_timeout(config.pool.idle_timeout());
        if let Some(timeout) = config.pool.acquire_timeout() {
            pool = pool.acquire_timeout(timeout);
        }

        Ok(SqliteBackend {
            pool: pool.connect_lazy_with(options),
        })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        SqliteBackend { pool }
    }

    /// Underlying pool, e.g. for creating the log table.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    type Conn = PoolConnection<Sqlite>;

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn acquire(&self) -> Result<Self::Conn, BackendError> {
        if self.pool.is_closed() {
            return Err(BackendError::Closed);
        }
        self.pool
            .acquire()
            .await
            .map_err(|e| BackendError::Acquire(Box::new(e)))
    }

    async fn execute(&self, conn: &mut Self::Conn, sql: &str, values: &[String]) -> Result<(), BackendError> {
        let mut query = sqlx::query(sql);
        for value in values {
            query = query.bind(value.as_str());
        }
        query
            .execute(&mut **conn)
            .await
            .map_err(|e| BackendError::Write(Box::new(e)))?;
        Ok(())
    }

    fn release(&self, conn: Self::Conn) {
        drop(conn);
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::write_once;
    use crate::config::PoolSettings;

    fn memory() -> ConnectionConfig {
        ConnectionConfig {
            url: "sqlite::memory:".to_string(),
            pool: PoolSettings {
                max_connections: 1,
                ..PoolSettings::default()
            },
        }
    }

    #[tokio::test]
    async fn writes_through_the_pool() {
        let backend = SqliteBackend::lazy(&memory()).unwrap();
        sqlx::query("CREATE TABLE t (a TEXT, b TEXT)")
            .execute(backend.pool())
            .await
            .unwrap();

        write_once(&backend, "INSERT INTO t (a, b) VALUES (?1, ?2)", &["x".to_string(), "y".to_string()])
            .await
            .unwrap();

        let row: (String, String) = sqlx::query_as("SELECT a, b FROM t")
            .fetch_one(backend.pool())
            .await
            .unwrap();
        assert_eq!(row, ("x".to_string(), "y".to_string()));
    }

    #[tokio::test]
    async fn failed_write_still_returns_connection() {
        let backend = SqliteBackend::lazy(&memory()).unwrap();

        let err = write_once(&backend, "INSERT INTO missing (a) VALUES (?1)", &["x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Write(_)));

        // With a single-connection pool this would hang if the handle leaked.
        let conn = tokio::time::timeout(std::time::Duration::from_secs(5), backend.acquire())
            .await
            .expect("connection was not released")
            .unwrap();
        backend.release(conn);
    }

    #[tokio::test]
    async fn closed_pool_rejects_acquire() {
        let backend = SqliteBackend::lazy(&memory()).unwrap();
        backend.close().await;
        assert!(matches!(backend.acquire().await, Err(BackendError::Closed)));
    }
}
