//! Hand-written member repository working directly on the unit of work.
//!
//! No registration table and no derivation: every statement is spelled out,
//! which makes this the reference the registered [`super::MemberRepository`]
//! must agree with.

use crate::model::{Entity, EntityId, Member};
use crate::page::Order;
use crate::query::{Params, QueryTemplate, SelectPlan};
use crate::repo::bulk::{BulkMutationCoordinator, ClearPolicy};
use crate::repo::{RepoError, RepoResult};
use crate::storage::BoundStatement;
use crate::uow::{LoadOptions, Managed, UnitOfWork};

const ALL_SQL: &str = "SELECT m.* FROM members m";
const USERNAME_AGE_SQL: &str =
    "SELECT m.* FROM members m WHERE m.username = :username AND m.age > :age";
const BY_AGE_SQL: &str = "SELECT m.* FROM members m WHERE m.age = :age";
const COUNT_BY_AGE_SQL: &str = "SELECT COUNT(*) FROM members m WHERE m.age = :age";
const AGE_PLUS_SQL: &str = "UPDATE members SET age = age + 1 WHERE age >= :age";

#[derive(Debug, Clone, Copy)]
pub struct ManualMemberRepository {
    bulk: BulkMutationCoordinator,
}

impl Default for ManualMemberRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualMemberRepository {
    /// Bulk updates leave clearing to the caller.
    pub fn new() -> Self {
        Self {
            bulk: BulkMutationCoordinator::new(ClearPolicy::CallerManaged),
        }
    }

    pub fn save(&self, uow: &mut UnitOfWork<'_>, member: &Managed<Member>) -> RepoResult<Managed<Member>> {
        uow.persist(member)
    }

    pub fn remove(&self, uow: &mut UnitOfWork<'_>, member: &Managed<Member>) -> RepoResult<()> {
        uow.remove(member)
    }

    pub fn find_all(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<Managed<Member>>> {
        self.select(uow, "findAll", ALL_SQL, &Params::new(), None)
    }

    pub fn find_by_id(&self, uow: &mut UnitOfWork<'_>, id: EntityId) -> RepoResult<Option<Managed<Member>>> {
        uow.find::<Member>(id)
    }

    /// # Errors
    /// - `NotFound` when no member has `id`.
    pub fn find(&self, uow: &mut UnitOfWork<'_>, id: EntityId) -> RepoResult<Managed<Member>> {
        uow.find::<Member>(id)?.ok_or(RepoError::NotFound {
            entity: Member::schema().name,
            id,
        })
    }

    pub fn count(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<u64> {
        let total = uow.fetch_scalar(&BoundStatement::new(
            "SELECT COUNT(*) FROM members",
            Vec::new(),
        ))?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    pub fn find_by_username_and_age_greater_than(
        &self,
        uow: &mut UnitOfWork<'_>,
        username: &str,
        age: i32,
    ) -> RepoResult<Vec<Managed<Member>>> {
        let params = Params::new().with("username", username).with("age", age);
        self.select(uow, "findByUsernameAndAgeGreaterThan", USERNAME_AGE_SQL, &params, None)
    }

    /// Runs the entity's `Member.findByUsername` named query.
    pub fn find_by_username(
        &self,
        uow: &mut UnitOfWork<'_>,
        username: &str,
    ) -> RepoResult<Vec<Managed<Member>>> {
        let named = Member::named_queries()
            .iter()
            .find(|query| query.name == "Member.findByUsername")
            .ok_or_else(|| RepoError::UnknownQuery("Member.findByUsername".to_string()))?;
        self.select(
            uow,
            named.name,
            named.sql,
            &Params::new().with("username", username),
            None,
        )
    }

    /// Members aged `age`, by username descending, `limit` rows from `offset`.
    pub fn find_by_page(
        &self,
        uow: &mut UnitOfWork<'_>,
        age: i32,
        offset: u64,
        limit: u64,
    ) -> RepoResult<Vec<Managed<Member>>> {
        let plan = SelectPlan::new(Member::schema())
            .order([Order::desc("username")])
            .limit(Some(limit))
            .offset(offset);
        self.select(uow, "findByPage", BY_AGE_SQL, &Params::new().with("age", age), Some(plan))
    }

    pub fn total_count(&self, uow: &mut UnitOfWork<'_>, age: i32) -> RepoResult<u64> {
        let statement =
            QueryTemplate::parse(COUNT_BY_AGE_SQL).bind("totalCount", &Params::new().with("age", age))?;
        Ok(u64::try_from(uow.fetch_scalar(&statement)?).unwrap_or(0))
    }

    /// Adds one year to every member aged `age` or older. Managed members are
    /// stale afterwards until the caller clears the unit of work.
    pub fn bulk_age_plus(&self, uow: &mut UnitOfWork<'_>, age: i32) -> RepoResult<usize> {
        let statement =
            QueryTemplate::parse(AGE_PLUS_SQL).bind("bulkAgePlus", &Params::new().with("age", age))?;
        self.bulk
            .execute(uow, "bulkAgePlus", Member::schema(), &statement, None)
    }

    fn select(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
        sql: &str,
        params: &Params,
        plan: Option<SelectPlan>,
    ) -> RepoResult<Vec<Managed<Member>>> {
        uow.ensure_fresh(Member::schema())?;
        let mut statement = QueryTemplate::parse(sql).bind(name, params)?;
        if let Some(plan) = plan {
            statement = plan.wrap(statement)?;
        }
        let records = uow.fetch_records(&statement)?;
        uow.load_entities::<Member>(&records, &LoadOptions::default())
    }
}
