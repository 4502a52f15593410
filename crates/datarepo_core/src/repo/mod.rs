//! Repository engine: query registration, generic CRUD, paging and bulk
//! mutations, plus the member/team repositories built on top.
//!
//! # Responsibility
//! - Compile declared queries once per repository.
//! - Route every read and write through the caller's unit of work.
//!
//! # Invariants
//! - Unsupported derived method names fail at construction, never at call
//!   time.
//! - Bulk mutations are followed by the configured cache invalidation before
//!   control returns to the caller.

mod bulk;
mod error;
mod generic;
mod manual_member_repo;
mod member_repo;
mod pagination;
mod registry;
mod team_repo;

pub use bulk::{BulkMutationCoordinator, ClearPolicy};
pub use error::{RepoError, RepoResult};
pub use generic::{CrudRepository, GenericRepository};
pub use manual_member_repo::ManualMemberRepository;
pub use member_repo::MemberRepository;
pub use pagination::{paginate, PageWindow};
pub use registry::{CompiledQuery, QueryDefinition, QueryHints, QueryKind, QueryRegistry};
pub use team_repo::TeamRepository;
