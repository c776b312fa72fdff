//! Shared SQLite plumbing for the disk-backed adapters.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::error::{ReckonError, Result};

/// Open (or create) a database file configured for several processes
/// writing concurrently.
///
/// - `journal_mode = WAL` so readers never block the writer
/// - `busy_timeout` so contending writers wait inside SQLite instead of
///   failing with `SQLITE_BUSY` straight away
pub fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            ReckonError::storage("create database directory", format!("{}: {e}", parent.display()))
        })?;
    }

    let conn = Connection::open(path)
        .map_err(|e| ReckonError::storage("open database", e.to_string()))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| ReckonError::storage("configure busy_timeout", e.to_string()))?;

    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .map_err(|e| ReckonError::storage("configure journal_mode", e.to_string()))?;
    if !journal_mode.eq_ignore_ascii_case("wal") {
        debug!(path = %path.display(), journal_mode = %journal_mode, "WAL unavailable, keeping fallback journal mode");
    }

    conn.execute_batch("PRAGMA synchronous = NORMAL;")
        .map_err(|e| ReckonError::storage("configure synchronous", e.to_string()))?;

    Ok(conn)
}

/// Private in-memory database, for tests and throwaway runs.
pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(|e| ReckonError::storage("open database", e.to_string()))
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ReckonError::corrupt("timestamp", format!("{raw:?}: {e}")))
}
