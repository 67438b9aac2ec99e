//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure the pragmas and lock timeout the catalog relies on.
//! - Run schema migrations before handing out a connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` (join rows cascade).
//! - Returned connections use `StoreConfig::busy_timeout`, capped at the
//!   largest value SQLite accepts.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use crate::config::StoreConfig;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// SQLite stores the busy timeout as an `i32` millisecond count.
const MAX_BUSY_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Creates the file when missing.
/// - Emits `event=db_open` with duration and status.
pub fn open_db(path: impl AsRef<Path>, config: &StoreConfig) -> DbResult<Connection> {
    open_with("file", config, || Connection::open(path))
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory(config: &StoreConfig) -> DbResult<Connection> {
    open_with("memory", config, Connection::open_in_memory)
}

fn open_with(
    mode: &'static str,
    config: &StoreConfig,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let opened = open()
        .map_err(DbError::Open)
        .and_then(|mut conn| bootstrap_connection(&mut conn, config).map(|steps| (conn, steps)));

    match opened {
        Ok((conn, steps)) => {
            info!(
                "event=db_open module=db status=ok mode={mode} migrations_applied={steps} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code={} error={err}",
                started_at.elapsed().as_millis(),
                err.code()
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, config: &StoreConfig) -> DbResult<usize> {
    conn.pragma_update(None, "foreign_keys", true)
        .map_err(DbError::setting("foreign_keys"))?;
    let enforced: bool = conn
        .pragma_query_value(None, "foreign_keys", |row| row.get(0))
        .map_err(DbError::setting("foreign_keys"))?;
    if !enforced {
        return Err(DbError::ForeignKeysUnavailable);
    }

    conn.busy_timeout(config.busy_timeout.min(MAX_BUSY_TIMEOUT))
        .map_err(DbError::setting("busy_timeout"))?;
    apply_migrations(conn)
}
