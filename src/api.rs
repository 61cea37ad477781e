//! # Async API
//!
//! [`AsyncWriteCoordinator`] lets Tokio tasks use the coordinator without
//! blocking the runtime.
//!
//! ## Which Calls Block?
//!
//! | Call | Blocks on | Async version |
//! |------|-----------|---------------|
//! | `execute`, `execute_batch` | retry sleeps, SQLite locks | `spawn_blocking` |
//! | `retry_failed`, `await_drain` | the same, plus the drain wait | `spawn_blocking` |
//! | `shutdown` | joining the writer thread | `spawn_blocking` |
//! | `enqueue`, `enqueue_batch` | nothing (`try_send`) | called inline |
//! | `stats`, `pool_status` | a short mutex hold | called inline |
//!
//! ```text
//! ┌──────────────────── Tokio runtime ─────────────────────┐
//! │  task ── enqueue() ──────────────────────► write queue │──► writer thread
//! │  task ── execute().await ─┐                            │
//! └───────────────────────────┼────────────────────────────┘
//!                             ▼
//!                 blocking pool thread ──► retry pipeline
//! ```
//!
//! ## Rust Concepts
//!
//! - **`spawn_blocking`**: moves synchronous work onto Tokio's blocking pool
//! - **`JoinError`**: a panic inside the blocking closure surfaces as
//!   `Error::Join` instead of unwinding through the caller

use std::path::Path;
use std::time::Duration;

use tokio::task;

use crate::config::CoordinatorConfig;
use crate::coordinator::WriteCoordinator;
use crate::error::Result;
use crate::pool::PoolStatus;
use crate::stats::StatsSnapshot;
use crate::transaction::{Statement, TransactionId};

/// Async handle over a [`WriteCoordinator`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AsyncWriteCoordinator {
    inner: WriteCoordinator,
}

impl AsyncWriteCoordinator {
    /// Async counterpart of [`WriteCoordinator::open`].
    pub async fn open<P: AsRef<Path>>(db_path: P, max_connections: usize, max_retries: u32) -> Result<Self> {
        let config = CoordinatorConfig {
            max_connections,
            max_retries,
            ..CoordinatorConfig::new(db_path)
        };
        Self::with_config(config).await
    }

    /// Async counterpart of [`WriteCoordinator::with_config`]. Opening
    /// pre-creates every pooled connection, so it runs on the blocking pool.
    pub async fn with_config(config: CoordinatorConfig) -> Result<Self> {
        let inner = task::spawn_blocking(move || WriteCoordinator::with_config(config)).await??;
        Ok(Self { inner })
    }

    /// Wraps an existing coordinator.
    pub fn from_sync(inner: WriteCoordinator) -> Self {
        Self { inner }
    }

    /// The underlying synchronous coordinator.
    pub fn as_sync(&self) -> &WriteCoordinator {
        &self.inner
    }

    pub async fn execute(&self, statement: Statement) -> Result<bool> {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.execute(statement)).await?
    }

    pub async fn execute_batch(&self, statements: Vec<Statement>) -> Result<bool> {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.execute_batch(statements)).await?
    }

    /// Never waits: a full queue is reported as `Error::QueueFull`.
    pub fn enqueue(&self, statement: Statement) -> Result<TransactionId> {
        self.inner.enqueue(statement)
    }

    pub fn enqueue_batch(&self, statements: Vec<Statement>) -> Result<TransactionId> {
        self.inner.enqueue_batch(statements)
    }

    pub async fn retry_failed(&self) -> Result<usize> {
        let inner = self.inner.clone();
        Ok(task::spawn_blocking(move || inner.retry_failed()).await?)
    }

    pub async fn await_drain(&self, timeout: Duration) -> Result<StatsSnapshot> {
        let inner = self.inner.clone();
        Ok(task::spawn_blocking(move || inner.await_drain(timeout)).await?)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats()
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool_status()
    }

    /// Async counterpart of [`WriteCoordinator::shutdown`].
    pub async fn shutdown(&self) -> Result<bool> {
        let inner = self.inner.clone();
        Ok(task::spawn_blocking(move || inner.shutdown()).await?)
    }
}

impl From<WriteCoordinator> for AsyncWriteCoordinator {
    fn from(inner: WriteCoordinator) -> Self {
        Self::from_sync(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::error::Error;

    async fn open(dir: &tempfile::TempDir) -> AsyncWriteCoordinator {
        let config = CoordinatorConfig {
            max_connections: 2,
            max_retries: 3,
            backoff: BackoffPolicy::immediate(),
            ..CoordinatorConfig::new(dir.path().join("async.db"))
        };
        AsyncWriteCoordinator::with_config(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_execute_and_drain() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir).await;

        assert!(db.execute(Statement::new("CREATE TABLE t (x)")).await.unwrap());
        for x in 0..10_i64 {
            db.enqueue(Statement::new("INSERT INTO t VALUES (?1)").bind(x)).unwrap();
        }

        let stats = db.await_drain(Duration::from_secs(10)).await.unwrap();
        assert_eq!(stats.successful_saves, 11);
        assert_eq!(stats.queue_size, 0);
        assert!(db.shutdown().await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir).await;
        db.execute(Statement::new("CREATE TABLE t (x INTEGER PRIMARY KEY)")).await.unwrap();

        let mut handles = Vec::new();
        for x in 0..8_i64 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.execute_batch(vec![
                    Statement::new("INSERT INTO t VALUES (?1)").bind(x * 2),
                    Statement::new("INSERT INTO t VALUES (?1)").bind(x * 2 + 1),
                ])
                .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }

        assert_eq!(db.stats().successful_saves, 9);
        db.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_then_use() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir).await;

        db.shutdown().await.unwrap();
        assert!(matches!(db.execute(Statement::new("SELECT 1")).await, Err(Error::ShutDown)));
        assert!(matches!(db.enqueue(Statement::new("SELECT 1")), Err(Error::ShutDown)));
    }
}
