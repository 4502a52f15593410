//! Member repository built from registered queries.
//!
//! # Responsibility
//! - Declare every member query once; registration fails fast on any
//!   method name the derivation grammar rejects.
//! - Expose typed methods over the generic engine.

use crate::config::RepositoryConfig;
use crate::model::{Member, MemberDto};
use crate::page::{Page, PageRequest};
use crate::query::{FetchPlan, Params};
use crate::repo::generic::{CrudRepository, GenericRepository};
use crate::repo::registry::QueryDefinition;
use crate::repo::RepoResult;
use crate::storage::LockMode;
use crate::uow::{Managed, UnitOfWork};

const FIND_USER_SQL: &str =
    "SELECT m.* FROM members m WHERE m.username = :username AND m.age = :age";
const USERNAME_LIST_SQL: &str = "SELECT m.username FROM members m";
const MEMBER_DTO_SQL: &str = "SELECT m.id AS id, m.username AS username, t.name AS team_name \
     FROM members m JOIN teams t ON t.id = m.team_id";
const FIND_BY_NAMES_SQL: &str = "SELECT m.* FROM members m WHERE m.username IN :names";
const FIND_BY_AGE_SQL: &str = "SELECT m.* FROM members m \
     LEFT JOIN teams t ON t.id = m.team_id WHERE m.age = :age";
const FIND_BY_AGE_COUNT_SQL: &str = "SELECT COUNT(*) FROM members m WHERE m.age = :age";
const BULK_AGE_PLUS_SQL: &str = "UPDATE members SET age = age + 1 WHERE age >= :age";
const FETCH_JOIN_SQL: &str = "SELECT m.*, t.id AS \"team__id\", t.name AS \"team__name\" \
     FROM members m LEFT JOIN teams t ON t.id = m.team_id";
const ALL_MEMBERS_SQL: &str = "SELECT m.* FROM members m";

fn definitions() -> Vec<QueryDefinition> {
    vec![
        QueryDefinition::derived("findByUsernameAndAgeGreaterThan"),
        QueryDefinition::derived("findTop3HelloBy"),
        QueryDefinition::derived("findByUsername"),
        QueryDefinition::explicit("findUser", FIND_USER_SQL),
        QueryDefinition::explicit("findUsernameList", USERNAME_LIST_SQL),
        QueryDefinition::explicit("findMemberDto", MEMBER_DTO_SQL),
        QueryDefinition::explicit("findByNames", FIND_BY_NAMES_SQL),
        QueryDefinition::derived("findListByUsername"),
        QueryDefinition::derived("findMemberByUsername"),
        QueryDefinition::derived("findOptionByUsername"),
        QueryDefinition::explicit("findByAge", FIND_BY_AGE_SQL).count_query(FIND_BY_AGE_COUNT_SQL),
        QueryDefinition::explicit("bulkAgePlus", BULK_AGE_PLUS_SQL).modifying(),
        QueryDefinition::explicit("findMemberFetchJoin", FETCH_JOIN_SQL).fetch_joined(&["team"]),
        QueryDefinition::explicit("findMemberEntityGraph", ALL_MEMBERS_SQL)
            .entity_graph(&["team"]),
        QueryDefinition::derived("findEntityGraphByUsername").entity_graph(&["team"]),
        QueryDefinition::derived("findReadOnlyByUsername").read_only(),
        QueryDefinition::derived("findLockByUsername").lock(LockMode::PessimisticWrite),
    ]
}

/// Repository of [`Member`] entities.
#[derive(Debug)]
pub struct MemberRepository {
    inner: GenericRepository<Member>,
}

impl MemberRepository {
    pub fn new() -> RepoResult<Self> {
        Self::with_config(&RepositoryConfig::default())
    }

    pub fn with_config(config: &RepositoryConfig) -> RepoResult<Self> {
        Ok(Self {
            inner: GenericRepository::with_config(config, definitions())?,
        })
    }

    /// Members named `username` strictly older than `age`.
    pub fn find_by_username_and_age_greater_than(
        &self,
        uow: &mut UnitOfWork<'_>,
        username: &str,
        age: i32,
    ) -> RepoResult<Vec<Managed<Member>>> {
        let params = Params::new().with("username", username).with("age", age);
        self.inner
            .list(uow, "findByUsernameAndAgeGreaterThan", &params)
    }

    /// First three members, no filter.
    pub fn find_top3_hello_by(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<Managed<Member>>> {
        self.inner.list(uow, "findTop3HelloBy", &Params::new())
    }

    /// Resolved through the `Member.findByUsername` named query.
    pub fn find_by_username(
        &self,
        uow: &mut UnitOfWork<'_>,
        username: &str,
    ) -> RepoResult<Vec<Managed<Member>>> {
        self.inner
            .list(uow, "findByUsername", &Params::new().with("username", username))
    }

    pub fn find_user(
        &self,
        uow: &mut UnitOfWork<'_>,
        username: &str,
        age: i32,
    ) -> RepoResult<Vec<Managed<Member>>> {
        let params = Params::new().with("username", username).with("age", age);
        self.inner.list(uow, "findUser", &params)
    }

    pub fn find_username_list(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<String>> {
        self.inner.project(uow, "findUsernameList", &Params::new())
    }

    /// Members that belong to a team, as flat views.
    pub fn find_member_dto(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<MemberDto>> {
        self.inner.project(uow, "findMemberDto", &Params::new())
    }

    pub fn find_by_names(
        &self,
        uow: &mut UnitOfWork<'_>,
        names: &[&str],
    ) -> RepoResult<Vec<Managed<Member>>> {
        self.inner
            .list(uow, "findByNames", &Params::new().with("names", names))
    }

    /// Empty when nothing matches.
    pub fn find_list_by_username(
        &self,
        uow: &mut UnitOfWork<'_>,
        username: &str,
    ) -> RepoResult<Vec<Managed<Member>>> {
        self.inner
            .list(uow, "findListByUsername", &Params::new().with("username", username))
    }

    /// # Errors
    /// - `NonUniqueResult` when several members share `username`.
    pub fn find_member_by_username(
        &self,
        uow: &mut UnitOfWork<'_>,
        username: &str,
    ) -> RepoResult<Option<Managed<Member>>> {
        self.inner
            .find_one(uow, "findMemberByUsername", &Params::new().with("username", username))
    }

    pub fn find_option_by_username(
        &self,
        uow: &mut UnitOfWork<'_>,
        username: &str,
    ) -> RepoResult<Option<Managed<Member>>> {
        self.inner
            .find_one(uow, "findOptionByUsername", &Params::new().with("username", username))
    }

    /// Page of members aged `age`; counted without the team join.
    pub fn find_by_age(
        &self,
        uow: &mut UnitOfWork<'_>,
        age: i32,
        request: &PageRequest,
    ) -> RepoResult<Page<Managed<Member>>> {
        self.inner
            .page(uow, "findByAge", &Params::new().with("age", age), request)
    }

    /// Adds one year to every member aged `age` or older.
    pub fn bulk_age_plus(&self, uow: &mut UnitOfWork<'_>, age: i32) -> RepoResult<usize> {
        self.inner
            .bulk_update(uow, "bulkAgePlus", &Params::new().with("age", age))
    }

    /// Members with their team selected by the same hand-written join.
    pub fn find_member_fetch_join(
        &self,
        uow: &mut UnitOfWork<'_>,
    ) -> RepoResult<Vec<Managed<Member>>> {
        self.inner.list(uow, "findMemberFetchJoin", &Params::new())
    }

    /// All members with `team` loaded through the entity graph.
    pub fn find_all_with_team(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<Managed<Member>>> {
        self.find_all(uow, &FetchPlan::of(&["team"]))
    }

    pub fn find_member_entity_graph(
        &self,
        uow: &mut UnitOfWork<'_>,
    ) -> RepoResult<Vec<Managed<Member>>> {
        self.inner.list(uow, "findMemberEntityGraph", &Params::new())
    }

    pub fn find_entity_graph_by_username(
        &self,
        uow: &mut UnitOfWork<'_>,
        username: &str,
    ) -> RepoResult<Vec<Managed<Member>>> {
        self.inner.list(
            uow,
            "findEntityGraphByUsername",
            &Params::new().with("username", username),
        )
    }

    /// Changes to the returned member are never flushed.
    pub fn find_read_only_by_username(
        &self,
        uow: &mut UnitOfWork<'_>,
        username: &str,
    ) -> RepoResult<Option<Managed<Member>>> {
        self.inner.find_one(
            uow,
            "findReadOnlyByUsername",
            &Params::new().with("username", username),
        )
    }

    /// Holds the write lock on the matched rows until the unit of work ends.
    ///
    /// # Errors
    /// - `LockTimeout` when another transaction keeps the lock past the
    ///   configured timeout.
    pub fn find_lock_by_username(
        &self,
        uow: &mut UnitOfWork<'_>,
        username: &str,
    ) -> RepoResult<Vec<Managed<Member>>> {
        self.inner
            .list(uow, "findLockByUsername", &Params::new().with("username", username))
    }
}

impl CrudRepository<Member> for MemberRepository {
    fn generic(&self) -> &GenericRepository<Member> {
        &self.inner
    }
}
