//! # Connection Setup
//!
//! Every connection the coordinator touches, pooled or overflow, is opened
//! through [`open_connection`] so they all carry the same pragmas. The
//! coordinator never creates tables: producers own their schema.
//!
//! ## Pragmas
//!
//! | Pragma | Value | Effect |
//! |--------|-------|--------|
//! | `busy_timeout` | 30 s (configurable) | SQLite waits this long on a lock before `SQLITE_BUSY` |
//! | `auto_vacuum` | `INCREMENTAL` | Free pages are tracked and reclaimable without a full `VACUUM` |
//! | `journal_mode` | `WAL` | Readers don't block the writer and vice versa |
//! | `synchronous` | `NORMAL` (configurable) | fsync on checkpoint, not on every commit |
//! | `cache_size` | -64000 (configurable) | 64 MiB page cache, expressed in KiB |
//! | `temp_store` | `MEMORY` | Temp tables and indices never hit disk |
//!
//! `busy_timeout` goes first so the remaining pragmas already wait politely if
//! another process holds the lock. `auto_vacuum` goes before `journal_mode`
//! because it only takes effect before the database header is first written.

use std::path::Path;

use rusqlite::Connection;

use crate::config::PragmaConfig;
use crate::error::Result;

/// Opens `path` (creating it if needed) and applies [`apply_pragmas`].
///
/// # Errors
///
/// `Error::Sqlite` if the file can't be opened, typically because the parent
/// directory does not exist or is not writable.
pub fn open_connection(path: &Path, pragmas: &PragmaConfig) -> Result<Connection> {
    let conn = Connection::open(path)?;
    apply_pragmas(&conn, pragmas)?;
    Ok(conn)
}

/// Applies the durability and concurrency pragmas to `conn`.
pub fn apply_pragmas(conn: &Connection, pragmas: &PragmaConfig) -> Result<()> {
    conn.busy_timeout(pragmas.busy_timeout)?;

    conn.execute_batch("PRAGMA auto_vacuum = INCREMENTAL")?;
    conn.execute_batch("PRAGMA journal_mode = WAL")?;
    conn.execute_batch(&format!(
        "PRAGMA synchronous = {}",
        pragmas.synchronous.pragma_value()
    ))?;
    conn.execute_batch(&format!("PRAGMA cache_size = -{}", pragmas.cache_size_kib))?;
    conn.execute_batch("PRAGMA temp_store = MEMORY")?;

    Ok(())
}

/// Current journal mode, lowercased by SQLite (`"wal"` once pragmas are applied).
pub fn journal_mode(conn: &Connection) -> Result<String> {
    Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?)
}

/// Merges as much of the WAL into the main file as possible without waiting
/// on readers or writers.
pub fn checkpoint_passive(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE)")?;
    Ok(())
}
