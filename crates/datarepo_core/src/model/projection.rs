//! Read-only projections built straight from query columns.

use crate::model::entity::EntityId;
use crate::repo::{RepoError, RepoResult};
use crate::storage::Record;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

/// Type constructed from one result row instead of a managed entity.
pub trait Projection: Sized {
    fn from_record(record: &Record) -> RepoResult<Self>;
}

impl Projection for String {
    fn from_record(record: &Record) -> RepoResult<Self> {
        match record.first() {
            Some(Value::Text(value)) => Ok(value.clone()),
            other => Err(RepoError::InvalidData(format!(
                "expected a text column, found {other:?}"
            ))),
        }
    }
}

impl Projection for i64 {
    fn from_record(record: &Record) -> RepoResult<Self> {
        match record.first() {
            Some(Value::Integer(value)) => Ok(*value),
            other => Err(RepoError::InvalidData(format!(
                "expected an integer column, found {other:?}"
            ))),
        }
    }
}

/// Flattened member view with the team name inlined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDto {
    pub id: EntityId,
    pub username: String,
    pub team_name: Option<String>,
}

impl MemberDto {
    pub fn new(id: EntityId, username: impl Into<String>, team_name: Option<String>) -> Self {
        Self {
            id,
            username: username.into(),
            team_name,
        }
    }
}

impl Projection for MemberDto {
    fn from_record(record: &Record) -> RepoResult<Self> {
        Ok(Self {
            id: record.integer("id")?,
            username: record.text("username")?,
            team_name: record.optional_text("team_name")?,
        })
    }
}
