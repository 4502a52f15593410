//! Unit of work: transaction-scoped persistence context.
//!
//! # Responsibility
//! - Own the database transaction for one logical unit of work.
//! - Keep the identity map (one managed instance per identity).
//! - Defer updates and removals of managed instances until flush.
//!
//! # Invariants
//! - Two lookups of the same identity return the same [`Managed`] instance
//!   until [`UnitOfWork::clear`] is called.
//! - Pending changes are flushed before every query and bulk mutation.
//! - Entity kinds marked stale by a caller-managed bulk mutation cannot be
//!   read until the context is cleared.
//! - Dropping a unit of work without `commit` rolls the transaction back.

use crate::model::{Entity, EntityId, EntitySchema, RelationDef};
use crate::repo::{RepoError, RepoResult};
use crate::storage::{BoundStatement, LockMode, Record, SqliteStorage};
use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::{Connection, Transaction};
use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};
use std::rc::Rc;
use uuid::Uuid;

/// Shared handle to an entity instance tracked by a unit of work.
///
/// Identity is reference identity: use [`Managed::ptr_eq`] to check that two
/// handles point at the same instance.
pub struct Managed<T>(Rc<RefCell<T>>);

impl<T> Managed<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(left: &Self, right: &Self) -> bool {
        Rc::ptr_eq(&left.0, &right.0)
    }
}

impl<T: Entity> Managed<T> {
    pub fn id(&self) -> Option<EntityId> {
        self.0.borrow().id()
    }
}

impl<T> Clone for Managed<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Debug> Debug for Managed<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Managed").field(&self.0.borrow()).finish()
    }
}

/// Identifies one unit of work and its clear generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextToken {
    context: Uuid,
    generation: u64,
}

#[derive(Clone)]
struct Resolved<T> {
    token: Option<ContextToken>,
    handle: Managed<T>,
}

/// Lazily resolved many-to-one reference.
///
/// A resolved handle is reused only inside the unit of work (and clear
/// generation) that produced it; anywhere else `resolve` goes back through
/// the identity map.
#[derive(Clone)]
pub struct Lazy<T> {
    id: EntityId,
    state: RefCell<Option<Resolved<T>>>,
}

impl<T: Entity> Lazy<T> {
    /// Reference known only by identity; resolving it may hit storage.
    pub fn unresolved(id: EntityId) -> Self {
        Self {
            id,
            state: RefCell::new(None),
        }
    }

    /// Reference materialized inside the unit of work identified by `token`.
    pub fn resolved(id: EntityId, token: ContextToken, handle: Managed<T>) -> Self {
        Self {
            id,
            state: RefCell::new(Some(Resolved {
                token: Some(token),
                handle,
            })),
        }
    }

    /// Reference to an instance the caller already holds, not yet bound to
    /// any unit of work.
    pub fn attached(id: EntityId, handle: Managed<T>) -> Self {
        Self {
            id,
            state: RefCell::new(Some(Resolved {
                token: None,
                handle,
            })),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Whether `resolve` in `uow` returns without touching storage or the
    /// identity map. Always `false` while the target kind is stale.
    pub fn is_resolved_in(&self, uow: &UnitOfWork<'_>) -> bool {
        !uow.is_stale(T::schema()) && self.cached_for(uow.token()).is_some()
    }

    /// Returns the referenced instance, loading it through `uow` on first
    /// access.
    ///
    /// # Errors
    /// - `StaleCache` while the target kind is stale, even when a handle is
    ///   cached.
    /// - `NotFound` when the referenced row no longer exists.
    pub fn resolve(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Managed<T>> {
        uow.ensure_fresh(T::schema())?;
        let token = uow.token();
        if let Some(handle) = self.cached_for(token) {
            return Ok(handle);
        }
        let handle = uow.find::<T>(self.id)?.ok_or(RepoError::NotFound {
            entity: T::schema().name,
            id: self.id,
        })?;
        *self.state.borrow_mut() = Some(Resolved {
            token: Some(token),
            handle: handle.clone(),
        });
        Ok(handle)
    }

    fn cached_for(&self, token: ContextToken) -> Option<Managed<T>> {
        self.state
            .borrow()
            .as_ref()
            .filter(|resolved| resolved.token == Some(token))
            .map(|resolved| resolved.handle.clone())
    }
}

impl<T> Debug for Lazy<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lazy")
            .field("id", &self.id)
            .field("loaded", &self.state.borrow().is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EntityKey {
    table: &'static str,
    id: EntityId,
}

impl EntityKey {
    fn new(schema: &EntitySchema, id: EntityId) -> Self {
        Self {
            table: schema.table,
            id,
        }
    }
}

trait Tracked {
    fn as_any(&self) -> &dyn Any;
    fn schema(&self) -> &'static EntitySchema;
    /// Current values when they differ from the last flushed snapshot.
    fn dirty_values(&self) -> Option<Vec<Value>>;
    fn mark_clean(&mut self, values: Vec<Value>);
}

struct TrackedEntity<T> {
    handle: Managed<T>,
    /// `None` for read-only instances: never dirty-checked or flushed.
    snapshot: Option<Vec<Value>>,
}

impl<T: Entity> Tracked for TrackedEntity<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> &'static EntitySchema {
        T::schema()
    }

    fn dirty_values(&self) -> Option<Vec<Value>> {
        let snapshot = self.snapshot.as_ref()?;
        let current = self.handle.borrow().column_values();
        (current != *snapshot).then_some(current)
    }

    fn mark_clean(&mut self, values: Vec<Value>) {
        if self.snapshot.is_some() {
            self.snapshot = Some(values);
        }
    }
}

/// How rows returned by a query become managed instances.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Skip snapshots; modifications are never flushed.
    pub read_only: bool,
    /// Relations whose target columns are present in each row.
    pub fetched: Vec<&'static RelationDef>,
    pub lock: LockMode,
}

/// Transaction-scoped persistence context passed to every repository call.
pub struct UnitOfWork<'conn> {
    id: Uuid,
    generation: u64,
    tx: Transaction<'conn>,
    statements: Cell<u64>,
    identity_map: BTreeMap<EntityKey, Box<dyn Tracked>>,
    removals: BTreeMap<EntityKey, &'static EntitySchema>,
    /// Tables whose cached rows a bulk mutation may have changed.
    stale: BTreeSet<String>,
}

impl<'conn> UnitOfWork<'conn> {
    /// Starts a deferred transaction on `conn`.
    pub fn begin(conn: &'conn mut Connection) -> RepoResult<Self> {
        let tx = conn.transaction()?;
        let id = Uuid::new_v4();
        debug!("event=uow_begin module=uow status=ok uow={id}");
        Ok(Self {
            id,
            generation: 0,
            tx,
            statements: Cell::new(0),
            identity_map: BTreeMap::new(),
            removals: BTreeMap::new(),
            stale: BTreeSet::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token that changes on every clear.
    pub fn token(&self) -> ContextToken {
        ContextToken {
            context: self.id,
            generation: self.generation,
        }
    }

    /// Statements sent to storage since `begin`.
    pub fn statements_executed(&self) -> u64 {
        self.statements.get()
    }

    /// Raw connection of the open transaction. Bypasses the identity map.
    pub fn connection(&self) -> &Connection {
        &self.tx
    }

    pub fn storage(&self) -> SqliteStorage<'_> {
        SqliteStorage::new(&self.tx, &self.statements)
    }

    /// Number of managed instances.
    pub fn managed_count(&self) -> usize {
        self.identity_map.len()
    }

    /// Whether `entity` is the instance this context manages for its identity.
    pub fn contains<T: Entity>(&self, entity: &Managed<T>) -> bool {
        let Some(id) = entity.id() else {
            return false;
        };
        self.lookup::<T>(&EntityKey::new(T::schema(), id))
            .is_some_and(|managed| Managed::ptr_eq(&managed, entity))
    }

    /// Makes `entity` managed.
    ///
    /// - No identity: inserts immediately and assigns the generated identity.
    /// - Already managed: no write; changes are flushed later.
    /// - Identity managed through another instance: copies the state onto the
    ///   managed instance and returns it.
    /// - Unknown identity: attaches to the stored row, or inserts with the
    ///   assigned identity when no row exists.
    pub fn persist<T: Entity>(&mut self, entity: &Managed<T>) -> RepoResult<Managed<T>> {
        let schema = T::schema();
        let Some(id) = entity.id() else {
            let values = entity.borrow().column_values();
            let id = self.storage().insert(schema, None, &values)?;
            entity.borrow_mut().assign_id(id);
            self.track(EntityKey::new(schema, id), entity.clone(), Some(values));
            debug!(
                "event=uow_persist module=uow status=ok entity={} action=insert",
                schema.name
            );
            return Ok(entity.clone());
        };

        self.ensure_fresh(schema)?;
        let key = EntityKey::new(schema, id);
        if let Some(managed) = self.lookup::<T>(&key) {
            if !Managed::ptr_eq(&managed, entity) {
                let state = entity.borrow().clone();
                *managed.borrow_mut() = state;
            }
            return Ok(managed);
        }

        self.removals.remove(&key);
        let stored = self.storage().find(schema, id)?;
        let snapshot = match stored {
            Some(record) => T::from_record(&record, "")?.column_values(),
            None => {
                let values = entity.borrow().column_values();
                self.storage().insert(schema, Some(id), &values)?;
                values
            }
        };
        self.track(key, entity.clone(), Some(snapshot));
        Ok(entity.clone())
    }

    /// Looks up one entity by identity, hitting storage only on a cache miss.
    pub fn find<T: Entity>(&mut self, id: EntityId) -> RepoResult<Option<Managed<T>>> {
        let schema = T::schema();
        self.ensure_fresh(schema)?;
        let key = EntityKey::new(schema, id);
        if self.removals.contains_key(&key) {
            return Ok(None);
        }
        if let Some(managed) = self.lookup::<T>(&key) {
            return Ok(Some(managed));
        }
        match self.storage().find(schema, id)? {
            Some(record) => self.attach_loaded::<T>(&record, "", false).map(Some),
            None => Ok(None),
        }
    }

    /// Schedules removal at the next flush. Never-persisted instances are
    /// ignored.
    pub fn remove<T: Entity>(&mut self, entity: &Managed<T>) -> RepoResult<()> {
        let schema = T::schema();
        let Some(id) = entity.id() else {
            return Ok(());
        };
        let key = EntityKey::new(schema, id);
        self.identity_map.remove(&key);
        self.removals.insert(key, schema);
        Ok(())
    }

    /// Stops managing `entity`; its pending changes are discarded.
    pub fn detach<T: Entity>(&mut self, entity: &Managed<T>) {
        if self.contains(entity) {
            if let Some(id) = entity.id() {
                self.identity_map.remove(&EntityKey::new(T::schema(), id));
            }
        }
    }

    /// Registers one loaded row, returning the already managed instance when
    /// the identity is known.
    pub fn attach_loaded<T: Entity>(
        &mut self,
        record: &Record,
        prefix: &str,
        read_only: bool,
    ) -> RepoResult<Managed<T>> {
        let schema = T::schema();
        self.ensure_fresh(schema)?;
        let id = record.integer(&format!("{prefix}{}", schema.id_column))?;
        let key = EntityKey::new(schema, id);
        if let Some(managed) = self.lookup::<T>(&key) {
            return Ok(managed);
        }
        let entity = T::from_record(record, prefix)?;
        let snapshot = (!read_only).then(|| entity.column_values());
        let handle = Managed::new(entity);
        self.track(key, handle.clone(), snapshot);
        Ok(handle)
    }

    /// Turns query rows into managed instances, attaching fetched relations
    /// and taking the requested lock. Instances keep first-row order and are
    /// never repeated.
    pub fn load_entities<T: Entity>(
        &mut self,
        records: &[Record],
        options: &LoadOptions,
    ) -> RepoResult<Vec<Managed<T>>> {
        let mut entities = Vec::with_capacity(records.len());
        let mut seen = BTreeSet::new();
        for record in records {
            let handle = self.attach_loaded::<T>(record, "", options.read_only)?;
            for relation in options.fetched.iter().copied() {
                let mut entity = handle.borrow_mut();
                entity.attach_fetched(relation, record, self, options.read_only)?;
            }
            // Joined rows repeat their owner; each instance is listed once.
            if seen.insert(handle.id()) {
                entities.push(handle);
            }
        }

        if options.lock != LockMode::None {
            let ids = entities.iter().filter_map(Managed::id).collect::<Vec<_>>();
            self.storage().lock(T::schema(), &ids, options.lock)?;
        }
        Ok(entities)
    }

    /// Flushes pending changes, then runs the query.
    pub fn fetch_records(&mut self, statement: &BoundStatement) -> RepoResult<Vec<Record>> {
        self.flush()?;
        self.storage().execute(statement)
    }

    /// Flushes pending changes, then runs a single-integer query.
    pub fn fetch_scalar(&mut self, statement: &BoundStatement) -> RepoResult<i64> {
        self.flush()?;
        self.storage().execute_scalar(statement)
    }

    /// Flushes pending changes, then runs a set-based mutation. The identity
    /// map is left untouched; see `BulkMutationCoordinator`.
    pub fn execute_mutation(&mut self, statement: &BoundStatement) -> RepoResult<usize> {
        self.flush()?;
        self.storage().execute_mutation(statement)
    }

    /// Writes dirty managed instances and scheduled removals.
    ///
    /// Returns the number of rows written.
    pub fn flush(&mut self) -> RepoResult<usize> {
        let storage = SqliteStorage::new(&self.tx, &self.statements);
        let mut written = 0;

        for (key, tracked) in self.identity_map.iter_mut() {
            let Some(values) = tracked.dirty_values() else {
                continue;
            };
            if self.stale.contains(&key.table.to_ascii_lowercase()) {
                return Err(RepoError::StaleCache {
                    entity: tracked.schema().name,
                });
            }
            storage.update(tracked.schema(), key.id, &values)?;
            tracked.mark_clean(values);
            written += 1;
        }

        for (key, schema) in std::mem::take(&mut self.removals) {
            storage.delete(schema, key.id)?;
            written += 1;
        }

        if written > 0 {
            debug!("event=uow_flush module=uow status=ok uow={} rows={written}", self.id);
        }
        Ok(written)
    }

    /// Detaches every managed instance and drops unflushed changes.
    pub fn clear(&mut self) {
        let detached = self.identity_map.len();
        self.identity_map.clear();
        self.removals.clear();
        self.stale.clear();
        self.generation += 1;
        debug!(
            "event=uow_clear module=uow status=ok uow={} detached={detached} generation={}",
            self.id, self.generation
        );
    }

    /// Blocks reads of every entity kind stored in `table` until the next
    /// clear.
    pub fn mark_table_stale(&mut self, table: &str) {
        self.stale.insert(table.to_ascii_lowercase());
    }

    pub fn is_stale(&self, schema: &EntitySchema) -> bool {
        self.stale.contains(&schema.table.to_ascii_lowercase())
    }

    /// Flushes and commits the transaction.
    pub fn commit(mut self) -> RepoResult<()> {
        let flushed = self.flush()?;
        let id = self.id;
        let statements = self.statements.get();
        self.tx.commit()?;
        info!(
            "event=uow_commit module=uow status=ok uow={id} flushed={flushed} statements={statements}"
        );
        Ok(())
    }

    /// Discards every change made in this unit of work.
    pub fn rollback(self) -> RepoResult<()> {
        let id = self.id;
        self.tx.rollback()?;
        warn!("event=uow_rollback module=uow status=ok uow={id}");
        Ok(())
    }

    /// # Errors
    /// - `StaleCache` while `schema` is marked stale.
    pub(crate) fn ensure_fresh(&self, schema: &EntitySchema) -> RepoResult<()> {
        if self.is_stale(schema) {
            return Err(RepoError::StaleCache {
                entity: schema.name,
            });
        }
        Ok(())
    }

    fn lookup<T: Entity>(&self, key: &EntityKey) -> Option<Managed<T>> {
        self.identity_map
            .get(key)
            .and_then(|tracked| tracked.as_any().downcast_ref::<TrackedEntity<T>>())
            .map(|tracked| tracked.handle.clone())
    }

    fn track<T: Entity>(&mut self, key: EntityKey, handle: Managed<T>, snapshot: Option<Vec<Value>>) {
        self.identity_map
            .insert(key, Box::new(TrackedEntity { handle, snapshot }));
    }
}
