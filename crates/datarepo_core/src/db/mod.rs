//! Connection bootstrap for the repository engine.
//!
//! # Responsibility
//! - Hand out SQLite connections ready for a [`crate::uow::UnitOfWork`]:
//!   foreign keys enforced, busy timeout set to the configured lock wait.
//! - Bring the `teams`/`members` schema up to the latest migration.
//!
//! # Invariants
//! - The applied schema version lives in `PRAGMA user_version`; pending
//!   migrations run in one transaction, so a failed step leaves it unchanged.
//! - A database written by a newer build is refused rather than downgraded.
//! - Errors here stay at the storage layer; repository code sees them as
//!   `RepoError::Storage` (or `LockTimeout` for busy databases).

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_db_with};

pub type DbResult<T> = Result<T, DbError>;

/// Failure while opening or migrating a database.
#[derive(Debug)]
pub enum DbError {
    /// Driver error from rusqlite, including busy/locked conditions.
    Sqlite(rusqlite::Error),
    /// `user_version` is ahead of the migrations compiled into this crate.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "repository schema version {db_version} is ahead of this build (latest known: {latest_supported})"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
