//! Entity trait and static mapping metadata.

use crate::repo::{RepoError, RepoResult};
use crate::storage::Record;
use crate::uow::UnitOfWork;
use rusqlite::types::Value;
use std::fmt::Debug;

/// Primary key of every entity table.
pub type EntityId = i64;

/// One persistent scalar property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub property: &'static str,
    pub column: &'static str,
}

/// Many-to-one association stored as a foreign key on the owning table.
#[derive(Debug, Clone, Copy)]
pub struct RelationDef {
    pub property: &'static str,
    pub join_column: &'static str,
    pub target: fn() -> &'static EntitySchema,
}

impl RelationDef {
    /// Column prefix used when the target row is selected alongside the owner.
    pub fn column_prefix(&self) -> String {
        format!("{}__", self.property)
    }

    /// Table alias used when the target is joined for fetching.
    pub fn join_alias(&self) -> String {
        format!("j_{}", self.property)
    }
}

/// Query template an entity declares under `<Entity>.<method>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedQuery {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Table mapping of one entity type.
#[derive(Debug)]
pub struct EntitySchema {
    /// Entity name used in named queries and error messages.
    pub name: &'static str,
    pub table: &'static str,
    /// Alias used by generated SQL.
    pub alias: &'static str,
    pub id_column: &'static str,
    pub fields: &'static [FieldDef],
    pub relations: &'static [RelationDef],
}

impl EntitySchema {
    /// Persistent non-identity columns: fields first, then foreign keys.
    pub fn columns(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .map(|field| field.column)
            .chain(self.relations.iter().map(|relation| relation.join_column))
            .collect()
    }

    /// Every addressable property, identity included.
    pub fn properties(&self) -> Vec<&'static str> {
        std::iter::once("id")
            .chain(self.fields.iter().map(|field| field.property))
            .chain(self.relations.iter().map(|relation| relation.property))
            .collect()
    }

    /// Resolves a property to its column. Relations resolve to their
    /// foreign key column.
    pub fn column_for(&self, property: &str) -> Option<&'static str> {
        if property == "id" {
            return Some(self.id_column);
        }
        self.fields
            .iter()
            .find(|field| field.property == property)
            .map(|field| field.column)
            .or_else(|| self.relation(property).map(|relation| relation.join_column))
    }

    pub fn relation(&self, property: &str) -> Option<&'static RelationDef> {
        let relations: &'static [RelationDef] = self.relations;
        relations.iter().find(|relation| relation.property == property)
    }

    /// `alias.id, alias.col, ...` in identity-then-`columns()` order.
    pub fn select_list(&self, alias: &str) -> String {
        std::iter::once(self.id_column)
            .chain(self.columns())
            .map(|column| format!("{alias}.{column}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Like [`Self::select_list`] with every column renamed to `prefix + column`.
    pub fn prefixed_select_list(&self, alias: &str, prefix: &str) -> String {
        std::iter::once(self.id_column)
            .chain(self.columns())
            .map(|column| format!("{alias}.{column} AS \"{prefix}{column}\""))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Persistent type managed by a unit of work.
pub trait Entity: Clone + Debug + 'static {
    fn schema() -> &'static EntitySchema;

    fn id(&self) -> Option<EntityId>;

    /// Stores the identity generated on insert. Only called while `id()` is
    /// `None`.
    fn assign_id(&mut self, id: EntityId);

    /// Persistent values in `schema().columns()` order.
    fn column_values(&self) -> Vec<Value>;

    /// Decodes an entity whose columns carry `prefix`.
    fn from_record(record: &Record, prefix: &str) -> RepoResult<Self>;

    /// Materializes a relation whose target columns were selected in the
    /// same row.
    fn attach_fetched(
        &mut self,
        relation: &'static RelationDef,
        record: &Record,
        uow: &mut UnitOfWork<'_>,
        read_only: bool,
    ) -> RepoResult<()> {
        let _ = (record, uow, read_only);
        Err(RepoError::UnknownProperty {
            entity: Self::schema().name,
            property: relation.property.to_string(),
        })
    }

    fn named_queries() -> &'static [NamedQuery] {
        &[]
    }
}
