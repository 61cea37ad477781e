//! # Coordinator Configuration
//!
//! Every tunable knob lives in [`CoordinatorConfig`]. Defaults come from the
//! `DEFAULT_*` constants below, so `CoordinatorConfig::new(path)` is a working
//! production setup and tests override only the fields they care about:
//!
//! ```rust,ignore
//! let config = CoordinatorConfig {
//!     max_retries: 20,
//!     ..CoordinatorConfig::new("listings.db")
//! };
//! ```
//!
//! [`CoordinatorConfig::from_env`] layers `CRAWLSTORE_*` environment variables
//! over the defaults for deployments that configure through the environment.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};

// =============================================================================
// Defaults
// =============================================================================

/// Pooled connections created at open time.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Execution attempts per transaction before it lands in the failed ledger.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// How long a caller waits on an empty pool before opening an overflow connection.
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// High-water mark of the background queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Upper bound on how long `shutdown` waits for the worker thread.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// Per-connection busy timeout handed to SQLite.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Page cache size in KiB (64 MiB).
pub const DEFAULT_CACHE_SIZE_KIB: i64 = 64_000;

/// Environment variable names read by [`CoordinatorConfig::from_env`].
pub const ENV_MAX_CONNECTIONS: &str = "CRAWLSTORE_MAX_CONNECTIONS";
pub const ENV_MAX_RETRIES: &str = "CRAWLSTORE_MAX_RETRIES";
pub const ENV_QUEUE_CAPACITY: &str = "CRAWLSTORE_QUEUE_CAPACITY";
pub const ENV_BUSY_TIMEOUT_MS: &str = "CRAWLSTORE_BUSY_TIMEOUT_MS";

// =============================================================================
// Pragmas
// =============================================================================

/// `PRAGMA synchronous` levels we allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synchronous {
    Off,
    /// Sync the WAL on checkpoint only. Safe against application crashes.
    Normal,
    Full,
}

impl Synchronous {
    pub fn pragma_value(&self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
        }
    }
}

/// Per-connection settings applied by [`connection::apply_pragmas`](crate::connection::apply_pragmas).
///
/// WAL journaling, in-memory temp storage and incremental auto-vacuum are
/// always on; only the knobs worth tuning per deployment are exposed.
#[derive(Debug, Clone, PartialEq)]
pub struct PragmaConfig {
    /// How long SQLite itself waits on a lock before reporting `SQLITE_BUSY`.
    pub busy_timeout: Duration,

    /// Page cache size in KiB.
    pub cache_size_kib: i64,

    /// Flush policy.
    pub synchronous: Synchronous,
}

impl Default for PragmaConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            cache_size_kib: DEFAULT_CACHE_SIZE_KIB,
            synchronous: Synchronous::Normal,
        }
    }
}

// =============================================================================
// Coordinator Configuration
// =============================================================================

/// Configuration for a [`WriteCoordinator`](crate::WriteCoordinator).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Database file. Its `-wal` and `-shm` sidecars live next to it.
    pub db_path: PathBuf,

    /// Pool size. Must be positive.
    pub max_connections: usize,

    /// Execution attempts per transaction. Must be positive.
    pub max_retries: u32,

    /// Wait on an empty pool before falling back to an overflow connection.
    pub acquire_timeout: Duration,

    /// Background queue capacity; `enqueue` rejects past this point.
    pub queue_capacity: usize,

    /// Bound on the worker join during `shutdown`.
    pub shutdown_timeout: Duration,

    /// Run `PRAGMA wal_checkpoint(PASSIVE)` after a contention error.
    pub checkpoint_on_contention: bool,

    /// Connection pragmas.
    pub pragmas: PragmaConfig,

    /// Sleep curve between retries.
    pub backoff: BackoffPolicy,
}

impl CoordinatorConfig {
    /// Default configuration for the database at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_retries: DEFAULT_MAX_RETRIES,
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            checkpoint_on_contention: true,
            pragmas: PragmaConfig::default(),
            backoff: BackoffPolicy::default(),
        }
    }

    /// Defaults overridden by `CRAWLSTORE_*` environment variables.
    ///
    /// # Errors
    ///
    /// `Error::InvalidConfig` if a variable is set but does not parse, or the
    /// result fails [`validate`](Self::validate).
    pub fn from_env(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::new(db_path);

        if let Some(n) = env_override(ENV_MAX_CONNECTIONS)? {
            config.max_connections = n;
        }
        if let Some(n) = env_override(ENV_MAX_RETRIES)? {
            config.max_retries = n;
        }
        if let Some(n) = env_override(ENV_QUEUE_CAPACITY)? {
            config.queue_capacity = n;
        }
        if let Some(ms) = env_override::<u64>(ENV_BUSY_TIMEOUT_MS)? {
            config.pragmas.busy_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the coordinator relies on.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig("max_connections must be positive".to_string()));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidConfig("max_retries must be positive".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue_capacity must be positive".to_string()));
        }
        if self.pragmas.cache_size_kib <= 0 {
            return Err(Error::InvalidConfig("cache_size_kib must be positive".to_string()));
        }
        self.backoff.validate()
    }
}

/// Reads and parses an optional environment variable.
fn env_override<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("{name}={raw:?} is not a valid value"))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            Err(Error::InvalidConfig(format!("{name} is not valid unicode")))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
