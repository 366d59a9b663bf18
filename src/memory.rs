use crate::backend::Backend;
use crate::error::BackendError;
use crate::schema::Dialect;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// In-process backend that records every statement instead of sending it
/// anywhere.
///
/// Useful for unit tests and dry runs: it counts handle acquisitions and
/// releases, can simulate latency, and can be told to fail.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

struct Inner {
    dialect: Dialect,
    writes: Mutex<Vec<ExecutedWrite>>,
    failure: Mutex<Option<Failure>>,
    latency: Mutex<Option<Duration>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    closed: AtomicBool,
}

/// One statement accepted by a [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedWrite {
    pub sql: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone)]
enum Failure {
    Acquire(String),
    Write(String),
}

/// Handle checked out of a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryConn {
    id: usize,
}

impl MemoryConn {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl MemoryBackend {
    pub fn new(dialect: Dialect) -> Self {
        MemoryBackend {
            inner: Arc::new(Inner {
                dialect,
                writes: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
                latency: Mutex::new(None),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Make every following write fail with a connection-refused error.
    pub fn fail_writes(&self, reason: impl Into<String>) {
        *lock(&self.inner.failure) = Some(Failure::Write(reason.into()));
    }

    /// Make every following acquire fail.
    pub fn fail_acquire(&self, reason: impl Into<String>) {
        *lock(&self.inner.failure) = Some(Failure::Acquire(reason.into()));
    }

    pub fn recover(&self) {
        *lock(&self.inner.failure) = None;
    }

    /// Delay each write by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.inner.latency) = Some(latency);
    }

    pub fn writes(&self) -> Vec<ExecutedWrite> {
        lock(&self.inner.writes).clone()
    }

    pub fn acquired(&self) -> usize {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Handles currently checked out.
    pub fn outstanding(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend::new(Dialect::Postgres)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Backend for MemoryBackend {
    type Conn = MemoryConn;

    fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    async fn acquire(&self) -> Result<MemoryConn, BackendError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        if let Some(Failure::Acquire(reason)) = lock(&self.inner.failure).clone() {
            return Err(BackendError::Acquire(Box::new(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                reason,
            ))));
        }
        let id = self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConn { id })
    }

    async fn execute(&self, _conn: &mut MemoryConn, sql: &str, values: &[String]) -> Result<(), BackendError> {
        let latency = *lock(&self.inner.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(Failure::Write(reason)) = lock(&self.inner.failure).clone() {
            return Err(BackendError::Write(Box::new(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                reason,
            ))));
        }
        lock(&self.inner.writes).push(ExecutedWrite {
            sql: sql.to_string(),
            values: values.to_vec(),
        });
        Ok(())
    }

    fn release(&self, _conn: MemoryConn) {
        self.inner.released.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::write_once;

    #[tokio::test]
    async fn records_writes_and_balances_handles() {
        let backend = MemoryBackend::default();
        write_once(&backend, "INSERT", &["a".to_string()]).await.unwrap();

        assert_eq!(
            backend.writes(),
            vec![ExecutedWrite {
                sql: "INSERT".to_string(),
                values: vec!["a".to_string()],
            }]
        );
        assert_eq!(backend.acquired(), 1);
        assert_eq!(backend.outstanding(), 0);
    }

    #[tokio::test]
    async fn failed_write_releases_handle() {
        let backend = MemoryBackend::default();
        backend.fail_writes("connection refused");

        assert!(write_once(&backend, "INSERT", &[]).await.is_err());
        assert!(backend.writes().is_empty());
        assert_eq!(backend.released(), 1);
    }

    #[tokio::test]
    async fn failed_acquire_takes_no_handle() {
        let backend = MemoryBackend::default();
        backend.fail_acquire("pool exhausted");

        assert!(matches!(write_once(&backend, "INSERT", &[]).await, Err(BackendError::Acquire(_))));
        assert_eq!(backend.acquired(), 0);
        assert_eq!(backend.released(), 0);

        backend.recover();
        assert!(write_once(&backend, "INSERT", &[]).await.is_ok());
    }
}
