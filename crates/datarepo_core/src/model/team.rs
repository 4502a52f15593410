//! Team entity.

use crate::model::entity::{Entity, EntityId, EntitySchema, FieldDef};
use crate::repo::RepoResult;
use crate::storage::Record;
use rusqlite::types::Value;

pub static TEAM_SCHEMA: EntitySchema = EntitySchema {
    name: "Team",
    table: "teams",
    alias: "t",
    id_column: "id",
    fields: &[FieldDef {
        property: "name",
        column: "name",
    }],
    relations: &[],
};

/// Group a member can belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    id: Option<EntityId>,
    pub name: String,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    /// Team with an externally assigned identity.
    pub fn with_id(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
        }
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id
    }
}

impl Entity for Team {
    fn schema() -> &'static EntitySchema {
        &TEAM_SCHEMA
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn assign_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn column_values(&self) -> Vec<Value> {
        vec![Value::Text(self.name.clone())]
    }

    fn from_record(record: &Record, prefix: &str) -> RepoResult<Self> {
        Ok(Self {
            id: Some(record.integer(&format!("{prefix}id"))?),
            name: record.text(&format!("{prefix}name"))?,
        })
    }
}
