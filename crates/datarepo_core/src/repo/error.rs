//! Error taxonomy surfaced by the repository engine.

use crate::db::DbError;
use crate::model::EntityId;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Every failure a repository, unit of work or query can report.
#[derive(Debug)]
pub enum RepoError {
    /// Connectivity, SQL or constraint failure reported by storage.
    Storage(DbError),
    /// A lock could not be acquired before the configured timeout.
    LockTimeout(rusqlite::Error),
    /// Method name contains a segment the derivation grammar cannot map.
    UnsupportedDerivation { method: String, segment: String },
    /// Read of an entity kind whose cached instances were invalidated by a
    /// caller-managed bulk mutation and not cleared yet.
    StaleCache { entity: &'static str },
    /// Query references a named parameter with no bound value.
    UnboundParameter { query: String, name: String },
    UnknownQuery(String),
    DuplicateQuery(String),
    UnknownProperty {
        entity: &'static str,
        property: String,
    },
    /// Query exists but cannot serve the requested operation.
    InvalidQueryUsage {
        query: String,
        reason: &'static str,
    },
    /// Single-result query matched more than one row.
    NonUniqueResult { query: String, count: usize },
    InvalidPageRequest(String),
    /// Reference to an entity that has not been persisted yet.
    TransientReference { entity: &'static str },
    NotFound {
        entity: &'static str,
        id: EntityId,
    },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(err) => write!(f, "{err}"),
            Self::LockTimeout(err) => write!(f, "lock wait timed out: {err}"),
            Self::UnsupportedDerivation { method, segment } => write!(
                f,
                "cannot derive query from `{method}`: unsupported segment `{segment}`"
            ),
            Self::StaleCache { entity } => write!(
                f,
                "cached {entity} instances are stale after a bulk mutation; clear the unit of work first"
            ),
            Self::UnboundParameter { query, name } => {
                write!(f, "query `{query}` has no value bound for parameter `{name}`")
            }
            Self::UnknownQuery(query) => write!(f, "no query registered as `{query}`"),
            Self::DuplicateQuery(query) => write!(f, "query `{query}` is registered twice"),
            Self::UnknownProperty { entity, property } => {
                write!(f, "{entity} has no property `{property}`")
            }
            Self::InvalidQueryUsage { query, reason } => {
                write!(f, "query `{query}` cannot be used here: {reason}")
            }
            Self::NonUniqueResult { query, count } => write!(
                f,
                "query `{query}` expected at most one result but found {count}"
            ),
            Self::InvalidPageRequest(message) => write!(f, "invalid page request: {message}"),
            Self::TransientReference { entity } => {
                write!(f, "referenced {entity} must be saved before it can be linked")
            }
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::LockTimeout(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::LockTimeout(value)
            }
            _ => Self::Storage(DbError::Sqlite(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RepoError;
    use rusqlite::ffi;

    #[test]
    fn busy_errors_map_to_lock_timeout() {
        let busy = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None);
        assert!(matches!(RepoError::from(busy), RepoError::LockTimeout(_)));
    }

    #[test]
    fn constraint_errors_map_to_storage() {
        let constraint =
            rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_CONSTRAINT), None);
        assert!(matches!(RepoError::from(constraint), RepoError::Storage(_)));
    }
}
