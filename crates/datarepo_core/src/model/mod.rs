//! Entity model and mapping metadata.
//!
//! # Responsibility
//! - Describe how entity types map to tables, columns and relations.
//! - Define the sample `Member`/`Team` domain and its read projections.
//!
//! # Invariants
//! - An entity identity never changes once assigned.
//! - `Entity::column_values` follows `EntitySchema::columns` order.

mod entity;
pub mod member;
pub mod projection;
pub mod team;

pub use entity::{Entity, EntityId, EntitySchema, FieldDef, NamedQuery, RelationDef};
pub use member::{Member, MEMBER_SCHEMA};
pub use projection::{MemberDto, Projection};
pub use team::{Team, TEAM_SCHEMA};
