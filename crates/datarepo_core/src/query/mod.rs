//! Query construction: parameters, explicit templates and derived queries.
//!
//! # Responsibility
//! - Bind named parameters into positional SQLite statements.
//! - Derive predicate trees from method names.
//! - Wrap base queries with fetch joins, ordering and bounds.
//!
//! # Invariants
//! - Nothing in this module touches storage; it only produces statements.

mod derive;
mod fetch;
mod params;
mod plan;
mod predicate;
mod template;

pub use derive::{derive_query, DerivedQuery, QuerySubject};
pub use fetch::FetchPlan;
pub use params::{ParamValue, Params};
pub use plan::SelectPlan;
pub use predicate::{Comparator, Condition, Predicate};
pub use template::QueryTemplate;
