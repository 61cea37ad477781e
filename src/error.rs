//! # Error Handling for crawlstore
//!
//! This module defines the error type used throughout crawlstore. A single
//! enum ([`Error`]) covers every failure mode that can cross the public
//! boundary, plus [`ContentionKind`], the classifier that decides whether a
//! SQLite failure is worth retrying.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations:
//! - `Display` comes from the `#[error(...)]` attributes
//! - `From` conversions come from `#[from]`, so `?` works on rusqlite calls
//!
//! ## Error Categories
//!
//! | Category | Examples | Where it ends up |
//! |----------|----------|------------------|
//! | Contention | `SQLITE_BUSY`, `SQLITE_LOCKED`, `SQLITE_READONLY` | Retried with backoff, then the failed ledger |
//! | Fatal per-transaction | Syntax error, constraint violation, disk full | `Ok(false)` immediately, no retry |
//! | Backpressure | Queue past its high-water mark | `Err(Error::QueueFull)` from `enqueue` |
//! | Lifecycle | Use after shutdown, bad configuration | `Err(..)` at the call site |
//!
//! Contention and fatal errors never escape the coordinator as `Err`; they are
//! folded into the boolean outcome and the statistics ledger.

use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in crawlstore operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite operation failed.
    ///
    /// Wraps any error from `rusqlite`. Inside the retry pipeline these are
    /// classified with [`ContentionKind::classify`]; at the public boundary they
    /// only surface from [`WriteCoordinator::open`](crate::WriteCoordinator::open)
    /// when the storage path can't be opened.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A configuration value is out of range or could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transaction queue is at its high-water mark.
    ///
    /// # Recovery
    ///
    /// Back off and resubmit, or call
    /// [`await_drain`](crate::WriteCoordinator::await_drain) to let the worker
    /// catch up. Nothing was queued.
    #[error("transaction queue is full ({capacity} pending)")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The coordinator (or its connection pool) has been shut down.
    #[error("write coordinator has shut down")]
    ShutDown,

    /// The background worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A blocking task backing the async facade panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Returns the contention class of this error, if it is one.
    pub fn contention_kind(&self) -> Option<ContentionKind> {
        match self {
            Error::Sqlite(err) => ContentionKind::classify(err),
            _ => None,
        }
    }

    /// True if the retry pipeline should try this transaction again.
    pub fn is_contention(&self) -> bool {
        self.contention_kind().is_some()
    }
}

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Contention Classification
// =============================================================================

/// The transient failures SQLite reports when another writer holds the lock.
///
/// # Why Three Kinds?
///
/// - `Busy`: another connection is actively writing. Backs off longer.
/// - `Locked`: a lock conflict inside the same shared cache or a stale lock.
/// - `ReadOnly`: reported while a WAL checkpoint or recovery is mid-flight;
///   it clears on its own just like the other two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentionKind {
    /// `SQLITE_BUSY` / "database is busy".
    Busy,
    /// `SQLITE_LOCKED` / "database is locked".
    Locked,
    /// `SQLITE_READONLY` / "attempt to write a readonly database".
    ReadOnly,
}

impl ContentionKind {
    /// Classifies a rusqlite error.
    ///
    /// The primary result code is authoritative when present. Other error
    /// variants fall back to matching the message text.
    pub fn classify(err: &rusqlite::Error) -> Option<Self> {
        match err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy => Some(ContentionKind::Busy),
                ErrorCode::DatabaseLocked => Some(ContentionKind::Locked),
                ErrorCode::ReadOnly => Some(ContentionKind::ReadOnly),
                _ => None,
            },
            other => Self::classify_message(&other.to_string()),
        }
    }

    /// Classifies free-form error text.
    pub fn classify_message(message: &str) -> Option<Self> {
        let lower = message.to_ascii_lowercase();
        if lower.contains("database is busy") || lower.contains("sqlite_busy") {
            Some(ContentionKind::Busy)
        } else if lower.contains("database is locked") || lower.contains("database table is locked") {
            Some(ContentionKind::Locked)
        } else if lower.contains("readonly database") || lower.contains("read-only database") {
            Some(ContentionKind::ReadOnly)
        } else {
            None
        }
    }

    /// Short lowercase label, used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentionKind::Busy => "busy",
            ContentionKind::Locked => "locked",
            ContentionKind::ReadOnly => "readonly",
        }
    }
}

impl std::fmt::Display for ContentionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
