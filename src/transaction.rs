//! # Transactions
//!
//! A [`Transaction`] is the unit of work the coordinator retries: one or more
//! [`Statement`]s that commit together or not at all. Producers build
//! statements; the coordinator wraps them in a transaction, assigns a
//! [`TransactionId`], and drives the status:
//!
//! ```text
//!            ┌──── contention, attempts left ────┐
//!            ▼                                   │
//!   Pending ──► InFlight ──────────────────────────┤
//!                  │                               │
//!                  ├──► Committed   (discarded)    │
//!                  └──► Failed      (failed ledger if contention exhausted)
//! ```
//!
//! Parameters are owned [`rusqlite::types::Value`]s rather than borrowed
//! `ToSql` references so a statement can move to the worker thread.

use std::fmt;

use rusqlite::types::Value;
use uuid::Uuid;

// =============================================================================
// Transaction ID
// =============================================================================

/// Opaque correlation id returned by `enqueue`.
///
/// Random UUID v4; unique within a process for all practical purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generates a fresh id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Statements
// =============================================================================

/// One parametrized write statement.
///
/// The coordinator does no schema validation; a malformed statement is a
/// fatal error for its transaction and is never retried.
///
/// # Example
///
/// ```rust
/// use crawlstore::Statement;
///
/// let stmt = Statement::new("INSERT INTO listings (id, price) VALUES (?1, ?2)")
///     .bind(42_i64)
///     .bind(315_000_000_i64);
/// assert_eq!(stmt.params.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with positional placeholders.
    pub sql: String,

    /// One value per placeholder, in order.
    pub params: Vec<Value>,
}

impl Statement {
    /// A statement with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// A statement with a full parameter tuple.
    pub fn with_params<I, V>(sql: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            sql: sql.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Appends one parameter (builder pattern).
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Appends a text parameter.
    pub fn bind_text(self, value: &str) -> Self {
        self.bind(value.to_string())
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Lifecycle of a transaction inside the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Created, not yet picked up.
    Pending,
    /// Being executed (including retry sleeps).
    InFlight,
    /// All statements committed.
    Committed,
    /// Gave up: retries exhausted or a non-retryable error.
    Failed,
}

/// An atomic group of statements plus its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TransactionId,
    statements: Vec<Statement>,
    status: TransactionStatus,
    attempt_count: u32,
}

impl Transaction {
    /// Wraps `statements` as a new pending transaction.
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            id: TransactionId::generate(),
            statements,
            status: TransactionStatus::Pending,
            attempt_count: 0,
        }
    }

    /// Single-statement transaction.
    pub fn single(statement: Statement) -> Self {
        Self::new(vec![statement])
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Execution attempts made so far, across every pass through the pipeline.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// True once the transaction reached a terminal status.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Committed | TransactionStatus::Failed
        )
    }

    pub(crate) fn set_status(&mut self, status: TransactionStatus) {
        self.status = status;
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }
}
