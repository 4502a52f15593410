//! Team repository.

use crate::config::RepositoryConfig;
use crate::model::Team;
use crate::page::{Page, PageRequest};
use crate::query::Params;
use crate::repo::generic::{CrudRepository, GenericRepository};
use crate::repo::registry::QueryDefinition;
use crate::repo::RepoResult;
use crate::uow::{Managed, UnitOfWork};

/// One row per member; the count only sees teams.
const WITH_MEMBERS_SQL: &str = "SELECT t.* FROM teams t JOIN members m ON m.team_id = t.id";
const WITH_MEMBERS_COUNT_SQL: &str = "SELECT COUNT(*) FROM teams t \
     WHERE EXISTS (SELECT 1 FROM members m WHERE m.team_id = t.id)";

#[derive(Debug)]
pub struct TeamRepository {
    inner: GenericRepository<Team>,
}

impl TeamRepository {
    pub fn new() -> RepoResult<Self> {
        Self::with_config(&RepositoryConfig::default())
    }

    pub fn with_config(config: &RepositoryConfig) -> RepoResult<Self> {
        let definitions = vec![
            QueryDefinition::derived("findByName"),
            QueryDefinition::explicit("findWithMembers", WITH_MEMBERS_SQL)
                .count_query(WITH_MEMBERS_COUNT_SQL),
        ];
        Ok(Self {
            inner: GenericRepository::with_config(config, definitions)?,
        })
    }

    pub fn find_by_name(&self, uow: &mut UnitOfWork<'_>, name: &str) -> RepoResult<Vec<Managed<Team>>> {
        self.inner
            .list(uow, "findByName", &Params::new().with("name", name))
    }

    /// Page of teams that have at least one member.
    pub fn find_with_members(
        &self,
        uow: &mut UnitOfWork<'_>,
        request: &PageRequest,
    ) -> RepoResult<Page<Managed<Team>>> {
        self.inner
            .page(uow, "findWithMembers", &Params::new(), request)
    }
}

impl CrudRepository<Team> for TeamRepository {
    fn generic(&self) -> &GenericRepository<Team> {
        &self.inner
    }
}
