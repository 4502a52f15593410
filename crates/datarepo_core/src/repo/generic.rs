//! Generic repository façade.
//!
//! # Responsibility
//! - Typed CRUD over one entity kind ([`CrudRepository`]).
//! - Execute registered queries as entity lists, single results,
//!   projections, pages, counts, existence checks, derived deletes and bulk
//!   mutations.
//!
//! # Invariants
//! - Every call goes through the caller's unit of work; nothing is cached on
//!   the repository itself beyond compiled queries.
//! - Reads of a stale entity kind fail before any statement runs.

use crate::config::RepositoryConfig;
use crate::model::{Entity, EntityId, Projection};
use crate::page::{Order, Page, PageRequest, Sort};
use crate::query::{FetchPlan, Params, QueryTemplate, SelectPlan};
use crate::repo::bulk::BulkMutationCoordinator;
use crate::repo::pagination::{paginate, PageWindow};
use crate::repo::registry::{
    CompiledQuery, QueryDefinition, QueryHints, QueryKind, QueryRegistry,
};
use crate::repo::{RepoError, RepoResult};
use crate::storage::BoundStatement;
use crate::uow::{LoadOptions, Managed, UnitOfWork};
use std::marker::PhantomData;

/// CRUD contract shared by every repository of `T`.
pub trait CrudRepository<T: Entity> {
    /// Engine backing the provided methods.
    fn generic(&self) -> &GenericRepository<T>;

    /// Inserts a new entity or merges a detached one; see
    /// [`UnitOfWork::persist`].
    fn save(&self, uow: &mut UnitOfWork<'_>, entity: &Managed<T>) -> RepoResult<Managed<T>> {
        uow.persist(entity)
    }

    fn save_all(
        &self,
        uow: &mut UnitOfWork<'_>,
        entities: &[Managed<T>],
    ) -> RepoResult<Vec<Managed<T>>> {
        entities.iter().map(|entity| uow.persist(entity)).collect()
    }

    /// Schedules removal at the next flush.
    fn remove(&self, uow: &mut UnitOfWork<'_>, entity: &Managed<T>) -> RepoResult<()> {
        uow.remove(entity)
    }

    /// Returns `false` when no entity has `id`.
    fn delete_by_id(&self, uow: &mut UnitOfWork<'_>, id: EntityId) -> RepoResult<bool> {
        match uow.find::<T>(id)? {
            Some(entity) => {
                uow.remove(&entity)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_by_id(&self, uow: &mut UnitOfWork<'_>, id: EntityId) -> RepoResult<Option<Managed<T>>> {
        uow.find::<T>(id)
    }

    fn exists_by_id(&self, uow: &mut UnitOfWork<'_>, id: EntityId) -> RepoResult<bool> {
        Ok(uow.find::<T>(id)?.is_some())
    }

    /// All entities, with the relations of `fetch` loaded in the same query.
    fn find_all(&self, uow: &mut UnitOfWork<'_>, fetch: &FetchPlan) -> RepoResult<Vec<Managed<T>>> {
        let query = self.generic().find_all_query(fetch)?;
        self.generic().select_entities(uow, &query, &Params::new(), &[], None)
    }

    fn find_all_sorted(&self, uow: &mut UnitOfWork<'_>, sort: &Sort) -> RepoResult<Vec<Managed<T>>> {
        let query = self.generic().find_all_query(&FetchPlan::none())?;
        self.generic()
            .select_entities(uow, &query, &Params::new(), sort.orders(), None)
    }

    fn find_all_paged(
        &self,
        uow: &mut UnitOfWork<'_>,
        request: &PageRequest,
    ) -> RepoResult<Page<Managed<T>>> {
        let query = self.generic().find_all_query(&FetchPlan::none())?;
        self.generic()
            .page_compiled(uow, &query, &Params::new(), request)
    }

    /// Number of stored entities, pending changes included.
    fn count(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<u64> {
        let schema = T::schema();
        let statement =
            BoundStatement::new(format!("SELECT COUNT(*) FROM {}", schema.table), Vec::new());
        to_count(uow.fetch_scalar(&statement)?)
    }
}

/// Repository engine for one entity kind: compiled queries plus policy.
#[derive(Debug)]
pub struct GenericRepository<T: Entity> {
    registry: QueryRegistry,
    config: RepositoryConfig,
    bulk: BulkMutationCoordinator,
    entity: PhantomData<fn() -> T>,
}

impl<T: Entity> GenericRepository<T> {
    /// Compiles `definitions` with the default repository policy.
    ///
    /// # Errors
    /// - Any registration error; see [`QueryRegistry::build`].
    pub fn new(definitions: Vec<QueryDefinition>) -> RepoResult<Self> {
        Self::with_config(&RepositoryConfig::default(), definitions)
    }

    pub fn with_config(
        config: &RepositoryConfig,
        definitions: Vec<QueryDefinition>,
    ) -> RepoResult<Self> {
        let registry = QueryRegistry::build(T::schema(), T::named_queries(), definitions)?;
        Ok(Self {
            registry,
            config: config.clone(),
            bulk: BulkMutationCoordinator::from_config(config),
            entity: PhantomData,
        })
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn bulk(&self) -> &BulkMutationCoordinator {
        &self.bulk
    }

    /// Every entity the select query `name` matches.
    pub fn list(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
        params: &Params,
    ) -> RepoResult<Vec<Managed<T>>> {
        self.list_sorted(uow, name, params, &Sort::unsorted())
    }

    /// Like [`Self::list`] with `sort` applied after the query's own ordering.
    pub fn list_sorted(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
        params: &Params,
        sort: &Sort,
    ) -> RepoResult<Vec<Managed<T>>> {
        let query = self.registry.get(name)?;
        query.expect_kind(QueryKind::Select)?;
        self.select_entities(uow, query, params, sort.orders(), None)
    }

    /// At most one entity.
    ///
    /// # Errors
    /// - `NonUniqueResult` when the query matches more than one entity.
    pub fn find_one(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
        params: &Params,
    ) -> RepoResult<Option<Managed<T>>> {
        let mut found = self.list(uow, name, params)?;
        match found.len() {
            0 | 1 => Ok(found.pop()),
            count => Err(RepoError::NonUniqueResult {
                query: name.to_string(),
                count,
            }),
        }
    }

    /// Rows of the select query `name` decoded as `P`, bypassing the
    /// identity map.
    pub fn project<P: Projection>(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
        params: &Params,
    ) -> RepoResult<Vec<P>> {
        let query = self.registry.get(name)?;
        query.expect_kind(QueryKind::Select)?;
        let base = query.template.bind(&query.name, params)?;
        let statement = SelectPlan::new(T::schema())
            .order(query.order.iter().cloned())
            .limit(query.limit)
            .wrap(base)?;
        uow.fetch_records(&statement)?
            .iter()
            .map(P::from_record)
            .collect()
    }

    /// One page of the select query `name`.
    pub fn page(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
        params: &Params,
        request: &PageRequest,
    ) -> RepoResult<Page<Managed<T>>> {
        let query = self.registry.get(name)?;
        query.expect_kind(QueryKind::Select)?;
        self.page_compiled(uow, query, params, request)
    }

    /// Result of a derived `count...By` query.
    pub fn count_by(&self, uow: &mut UnitOfWork<'_>, name: &str, params: &Params) -> RepoResult<u64> {
        let query = self.registry.get(name)?;
        query.expect_kind(QueryKind::Count)?;
        let statement = query.template.bind(&query.name, params)?;
        to_count(uow.fetch_scalar(&statement)?)
    }

    /// Result of a derived `exists...By` query.
    pub fn exists_by(&self, uow: &mut UnitOfWork<'_>, name: &str, params: &Params) -> RepoResult<bool> {
        let query = self.registry.get(name)?;
        query.expect_kind(QueryKind::Exists)?;
        let statement = query.template.bind(&query.name, params)?;
        Ok(uow.fetch_scalar(&statement)? != 0)
    }

    /// Loads every match of a derived `delete...By` query and removes each
    /// one through the unit of work. Returns the number removed.
    pub fn delete_by(&self, uow: &mut UnitOfWork<'_>, name: &str, params: &Params) -> RepoResult<usize> {
        let query = self.registry.get(name)?;
        query.expect_kind(QueryKind::Delete)?;
        let entities = self.select_entities(uow, query, params, &[], None)?;
        for entity in &entities {
            uow.remove(entity)?;
        }
        Ok(entities.len())
    }

    /// Runs the modifying query `name` as one set-based statement.
    pub fn bulk_update(&self, uow: &mut UnitOfWork<'_>, name: &str, params: &Params) -> RepoResult<usize> {
        let query = self.registry.get(name)?;
        query.expect_kind(QueryKind::Mutation)?;
        let statement = query.template.bind(&query.name, params)?;
        self.bulk
            .execute(uow, &query.name, T::schema(), &statement, query.clear_policy)
    }

    pub(crate) fn find_all_query(&self, fetch: &FetchPlan) -> RepoResult<CompiledQuery> {
        let schema = T::schema();
        Ok(CompiledQuery {
            name: "findAll".to_string(),
            kind: QueryKind::Select,
            template: QueryTemplate::parse(&format!(
                "SELECT {} FROM {} {}",
                schema.select_list(schema.alias),
                schema.table,
                schema.alias
            )),
            count: Some(QueryTemplate::parse(&format!(
                "SELECT COUNT(*) FROM {}",
                schema.table
            ))),
            order: Vec::new(),
            limit: None,
            join_fetch: fetch.resolve(schema)?,
            inline_fetch: Vec::new(),
            hints: QueryHints::default(),
            clear_policy: None,
            joins_rows: false,
        })
    }

    pub(crate) fn page_compiled(
        &self,
        uow: &mut UnitOfWork<'_>,
        query: &CompiledQuery,
        params: &Params,
        request: &PageRequest,
    ) -> RepoResult<Page<Managed<T>>> {
        let max_page_size = u64::from(self.config.max_page_size);
        uow.ensure_fresh(T::schema())?;
        paginate(uow, query, params, request, max_page_size, |uow, window| {
            self.select_entities(uow, query, params, request.sort().orders(), Some(window))
        })
    }

    /// Binds, wraps and runs `query`, turning rows into managed entities.
    pub(crate) fn select_entities(
        &self,
        uow: &mut UnitOfWork<'_>,
        query: &CompiledQuery,
        params: &Params,
        sort: &[Order],
        window: Option<PageWindow>,
    ) -> RepoResult<Vec<Managed<T>>> {
        let schema = T::schema();
        uow.ensure_fresh(schema)?;
        let base = query.template.bind(&query.name, params)?;
        let (limit, offset) = match window {
            Some(window) => (Some(window.limit), window.offset),
            None => (query.limit, 0),
        };
        let statement = SelectPlan::new(schema)
            .distinct(query.joins_rows && query.inline_fetch.is_empty())
            .joins(&query.join_fetch)
            .order(query.order.iter().chain(sort).cloned())
            .limit(limit)
            .offset(offset)
            .wrap(base)?;
        let records = uow.fetch_records(&statement)?;
        uow.load_entities::<T>(
            &records,
            &LoadOptions {
                read_only: query.hints.read_only,
                fetched: query.fetched(),
                lock: query.hints.lock,
            },
        )
    }
}

impl<T: Entity> CrudRepository<T> for GenericRepository<T> {
    fn generic(&self) -> &GenericRepository<T> {
        self
    }
}

fn to_count(value: i64) -> RepoResult<u64> {
    u64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("negative count {value}")))
}
