//! Generic repository engine over SQLite.
//!
//! Entities are tracked by a transaction-scoped [`uow::UnitOfWork`];
//! repositories compile derived and explicit queries once and execute them
//! as entity lists, projections, pages or bulk mutations.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod page;
pub mod query;
pub mod repo;
pub mod storage;
pub mod uow;

pub use config::{ConfigError, CoreConfig, DatabaseConfig, LoggingConfig, RepositoryConfig};
pub use db::{open_db, open_db_in_memory, open_db_with, DbError};
pub use logging::{default_log_level, init_logging, init_logging_from, logging_status};
pub use model::{Entity, EntityId, Member, MemberDto, Projection, Team};
pub use page::{Direction, Order, Page, PageRequest, Sort};
pub use query::{FetchPlan, ParamValue, Params};
pub use repo::{
    BulkMutationCoordinator, ClearPolicy, CrudRepository, GenericRepository,
    ManualMemberRepository, MemberRepository, QueryDefinition, RepoError, RepoResult,
    TeamRepository,
};
pub use storage::LockMode;
pub use uow::{Lazy, Managed, UnitOfWork};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
