//! Member entity.
//!
//! # Invariants
//! - `team` is a lazy reference; it is materialized only by an entity graph
//!   or an explicit `Lazy::resolve`.
//! - A member can only link a team that already has an identity.

use crate::model::entity::{Entity, EntityId, EntitySchema, FieldDef, NamedQuery, RelationDef};
use crate::model::team::Team;
use crate::repo::{RepoError, RepoResult};
use crate::storage::Record;
use crate::uow::{Lazy, Managed, UnitOfWork};
use rusqlite::types::Value;

pub static MEMBER_SCHEMA: EntitySchema = EntitySchema {
    name: "Member",
    table: "members",
    alias: "m",
    id_column: "id",
    fields: &[
        FieldDef {
            property: "username",
            column: "username",
        },
        FieldDef {
            property: "age",
            column: "age",
        },
    ],
    relations: &[RelationDef {
        property: "team",
        join_column: "team_id",
        target: team_schema,
    }],
};

const MEMBER_NAMED_QUERIES: &[NamedQuery] = &[NamedQuery {
    name: "Member.findByUsername",
    sql: "SELECT m.* FROM members m WHERE m.username = :username",
}];

fn team_schema() -> &'static EntitySchema {
    Team::schema()
}

#[derive(Debug, Clone)]
pub struct Member {
    id: Option<EntityId>,
    pub username: String,
    pub age: i32,
    team: Option<Lazy<Team>>,
}

impl Member {
    pub fn new(username: impl Into<String>) -> Self {
        Self::with_age(username, 0)
    }

    pub fn with_age(username: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            username: username.into(),
            age,
            team: None,
        }
    }

    /// Member linked to an already persisted team.
    pub fn with_team(
        username: impl Into<String>,
        age: i32,
        team: &Managed<Team>,
    ) -> RepoResult<Self> {
        let mut member = Self::with_age(username, age);
        member.change_team(team)?;
        Ok(member)
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    pub fn team(&self) -> Option<&Lazy<Team>> {
        self.team.as_ref()
    }

    /// Links this member to `team`.
    ///
    /// # Errors
    /// - `TransientReference` when `team` has not been saved yet.
    pub fn change_team(&mut self, team: &Managed<Team>) -> RepoResult<()> {
        let team_id = team
            .id()
            .ok_or(RepoError::TransientReference { entity: "Team" })?;
        self.team = Some(Lazy::attached(team_id, team.clone()));
        Ok(())
    }

    pub fn leave_team(&mut self) {
        self.team = None;
    }
}

impl Entity for Member {
    fn schema() -> &'static EntitySchema {
        &MEMBER_SCHEMA
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn assign_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.username.clone()),
            Value::Integer(i64::from(self.age)),
            self.team
                .as_ref()
                .map_or(Value::Null, |team| Value::Integer(team.id())),
        ]
    }

    fn from_record(record: &Record, prefix: &str) -> RepoResult<Self> {
        let age_column = format!("{prefix}age");
        let age = record.integer(&age_column)?;
        let age = i32::try_from(age).map_err(|_| {
            RepoError::InvalidData(format!("value {age} in `{age_column}` overflows i32"))
        })?;
        Ok(Self {
            id: Some(record.integer(&format!("{prefix}id"))?),
            username: record.text(&format!("{prefix}username"))?,
            age,
            team: record
                .optional_integer(&format!("{prefix}team_id"))?
                .map(Lazy::unresolved),
        })
    }

    fn attach_fetched(
        &mut self,
        relation: &'static RelationDef,
        record: &Record,
        uow: &mut UnitOfWork<'_>,
        read_only: bool,
    ) -> RepoResult<()> {
        if relation.property != "team" {
            return Err(RepoError::UnknownProperty {
                entity: MEMBER_SCHEMA.name,
                property: relation.property.to_string(),
            });
        }
        let prefix = relation.column_prefix();
        self.team = match record.optional_integer(&format!("{prefix}id"))? {
            Some(team_id) => {
                let team = uow.attach_loaded::<Team>(record, &prefix, read_only)?;
                Some(Lazy::resolved(team_id, uow.token(), team))
            }
            None => None,
        };
        Ok(())
    }

    fn named_queries() -> &'static [NamedQuery] {
        MEMBER_NAMED_QUERIES
    }
}
