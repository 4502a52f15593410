//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure the pragmas and busy timeout the repository engine relies on.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - The busy timeout doubles as the pessimistic lock wait budget.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::DbResult;
use crate::config::DatabaseConfig;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a SQLite database file with the default lock timeout.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let timeout = Duration::from_millis(DatabaseConfig::default().lock_timeout_ms);
    open_target(Some(path.as_ref()), timeout)
}

/// Opens an in-memory SQLite database with the default lock timeout.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let timeout = Duration::from_millis(DatabaseConfig::default().lock_timeout_ms);
    open_target(None, timeout)
}

/// Opens the database described by `config`.
///
/// An absent `path` selects an in-memory database.
pub fn open_db_with(config: &DatabaseConfig) -> DbResult<Connection> {
    open_target(
        config.path.as_deref(),
        Duration::from_millis(config.lock_timeout_ms),
    )
}

fn open_target(path: Option<&Path>, lock_timeout: Duration) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = if path.is_some() { "file" } else { "memory" };
    info!("event=db_open module=db status=start mode={mode}");

    let opened = match path {
        Some(path) => Connection::open(path),
        None => Connection::open_in_memory(),
    };
    let mut conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, lock_timeout) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={} lock_timeout_ms={}",
                started_at.elapsed().as_millis(),
                lock_timeout.as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, lock_timeout: Duration) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(lock_timeout)?;
    apply_migrations(conn)?;
    Ok(())
}
