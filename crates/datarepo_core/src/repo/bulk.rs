//! Set-based mutations and the cache invalidation that must follow them.
//!
//! # Invariants
//! - Pending changes are flushed before the mutation runs.
//! - With `Automatic`, the unit of work is cleared before control returns.
//! - With `CallerManaged`, the table named by the statement's
//!   `UPDATE`/`DELETE FROM`/`INSERT INTO` target is marked stale and every
//!   read of an entity kind stored there fails with `StaleCache` until the
//!   caller clears. Statements without a recognizable target (a leading
//!   `WITH`, for one) fall back to the repository's own table.

use crate::config::RepositoryConfig;
use crate::model::EntitySchema;
use crate::repo::RepoResult;
use crate::storage::BoundStatement;
use crate::uow::UnitOfWork;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

static TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^\s*(?:UPDATE(?:\s+OR\s+[a-z]+)?|DELETE\s+FROM|(?:INSERT(?:\s+OR\s+[a-z]+)?|REPLACE)\s+INTO)\s+"?([A-Za-z_][A-Za-z0-9_]*)"?"#,
    )
    .expect("valid mutation target regex")
});

/// What happens to cached instances after a bulk mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearPolicy {
    /// Clear the whole unit of work.
    #[default]
    Automatic,
    /// Leave clearing to the caller; reads fail until it happens.
    CallerManaged,
}

impl ClearPolicy {
    fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::CallerManaged => "caller_managed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BulkMutationCoordinator {
    policy: ClearPolicy,
}

impl BulkMutationCoordinator {
    pub fn new(policy: ClearPolicy) -> Self {
        Self { policy }
    }

    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self::new(if config.clear_after_bulk_update {
            ClearPolicy::Automatic
        } else {
            ClearPolicy::CallerManaged
        })
    }

    pub fn policy(&self) -> ClearPolicy {
        self.policy
    }

    /// Runs one mutation against rows of `schema` and returns the affected
    /// row count. `policy` overrides the coordinator default.
    pub fn execute(
        &self,
        uow: &mut UnitOfWork<'_>,
        query: &str,
        schema: &'static EntitySchema,
        statement: &BoundStatement,
        policy: Option<ClearPolicy>,
    ) -> RepoResult<usize> {
        let policy = policy.unwrap_or(self.policy);
        let affected = match uow.execute_mutation(statement) {
            Ok(affected) => affected,
            Err(err) => {
                warn!(
                    "event=bulk_update module=repo status=error query={query} entity={} error={err}",
                    schema.name
                );
                return Err(err);
            }
        };

        let target = mutation_target(&statement.sql).unwrap_or(schema.table);
        match policy {
            ClearPolicy::Automatic => uow.clear(),
            ClearPolicy::CallerManaged => uow.mark_table_stale(target),
        }
        info!(
            "event=bulk_update module=repo status=ok query={query} entity={} table={target} affected={affected} clear={}",
            schema.name,
            policy.as_str()
        );
        Ok(affected)
    }
}

/// Table an `UPDATE`, `DELETE` or `INSERT` statement writes to.
fn mutation_target(sql: &str) -> Option<&str> {
    TARGET_RE
        .captures(sql)
        .and_then(|captures| captures.get(1))
        .map(|table| table.as_str())
}
