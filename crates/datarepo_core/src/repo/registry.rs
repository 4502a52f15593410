//! Query registration table.
//!
//! # Responsibility
//! - Compile every query a repository declares once, at construction.
//! - Resolve derived method names to named templates or derived plans.
//!
//! # Invariants
//! - A derivation failure aborts registration; it never surfaces at call time.
//! - Query names are unique per registry.

use crate::model::{EntitySchema, NamedQuery, RelationDef};
use crate::page::Order;
use crate::query::{derive_query, FetchPlan, QuerySubject, QueryTemplate};
use crate::repo::bulk::ClearPolicy;
use crate::repo::{RepoError, RepoResult};
use crate::storage::LockMode;
use log::info;
use std::collections::BTreeMap;

/// What executing a compiled query produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Entity rows or projections.
    Select,
    /// Single integer count.
    Count,
    /// Single boolean.
    Exists,
    /// Load matching entities, then remove each one.
    Delete,
    /// Set-based `UPDATE`/`DELETE` through the bulk coordinator.
    Mutation,
}

/// Execution hints attached to a select.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryHints {
    /// Returned entities are never dirty-checked.
    pub read_only: bool,
    pub lock: LockMode,
}

#[derive(Debug, Clone)]
enum QuerySource {
    Derived,
    Explicit(String),
    Named(String),
}

/// Declarative description of one repository query.
#[derive(Debug, Clone)]
pub struct QueryDefinition {
    name: String,
    source: QuerySource,
    count_sql: Option<String>,
    entity_graph: Vec<String>,
    fetch_joined: Vec<String>,
    hints: QueryHints,
    modifying: bool,
    clear_policy: Option<ClearPolicy>,
}

impl QueryDefinition {
    fn with_source(name: impl Into<String>, source: QuerySource) -> Self {
        Self {
            name: name.into(),
            source,
            count_sql: None,
            entity_graph: Vec::new(),
            fetch_joined: Vec::new(),
            hints: QueryHints::default(),
            modifying: false,
            clear_policy: None,
        }
    }

    /// Query derived from `method`, or the entity's `<Entity>.<method>` named
    /// query when one is declared.
    pub fn derived(method: impl Into<String>) -> Self {
        Self::with_source(method, QuerySource::Derived)
    }

    /// Hand-written template registered as `name`.
    pub fn explicit(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::with_source(name, QuerySource::Explicit(sql.into()))
    }

    /// Named query declared by the entity, registered as `name`.
    pub fn named(name: impl Into<String>, named_query: impl Into<String>) -> Self {
        Self::with_source(name, QuerySource::Named(named_query.into()))
    }

    /// Count template used by paged execution instead of wrapping the query.
    pub fn count_query(mut self, sql: impl Into<String>) -> Self {
        self.count_sql = Some(sql.into());
        self
    }

    /// Relations joined and materialized with every result row.
    pub fn entity_graph(mut self, paths: &[&str]) -> Self {
        self.entity_graph = paths.iter().map(|path| (*path).to_string()).collect();
        self
    }

    /// Relations the template itself selects with `<relation>__` prefixed
    /// columns.
    pub fn fetch_joined(mut self, paths: &[&str]) -> Self {
        self.fetch_joined = paths.iter().map(|path| (*path).to_string()).collect();
        self
    }

    pub fn read_only(mut self) -> Self {
        self.hints.read_only = true;
        self
    }

    pub fn lock(mut self, mode: LockMode) -> Self {
        self.hints.lock = mode;
        self
    }

    /// Marks an explicit template as a bulk mutation.
    pub fn modifying(mut self) -> Self {
        self.modifying = true;
        self
    }

    /// Overrides the repository's clear policy for this mutation.
    pub fn clear_policy(mut self, policy: ClearPolicy) -> Self {
        self.clear_policy = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registered, ready-to-bind query.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub name: String,
    pub kind: QueryKind,
    pub template: QueryTemplate,
    pub count: Option<QueryTemplate>,
    /// Ordering applied after the base query.
    pub order: Vec<Order>,
    /// `First`/`Top` cap.
    pub limit: Option<u64>,
    /// Relations joined by the engine.
    pub join_fetch: Vec<&'static RelationDef>,
    /// Relations already selected by the template.
    pub inline_fetch: Vec<&'static RelationDef>,
    pub hints: QueryHints,
    pub clear_policy: Option<ClearPolicy>,
    /// Template joins other tables, so rows may repeat per entity.
    pub joins_rows: bool,
}

impl CompiledQuery {
    /// Every relation materialized from result rows.
    pub fn fetched(&self) -> Vec<&'static RelationDef> {
        self.join_fetch
            .iter()
            .chain(self.inline_fetch.iter())
            .copied()
            .collect()
    }

    pub(crate) fn expect_kind(&self, expected: QueryKind) -> RepoResult<()> {
        if self.kind == expected {
            return Ok(());
        }
        Err(RepoError::InvalidQueryUsage {
            query: self.name.clone(),
            reason: match expected {
                QueryKind::Select => "not a select query",
                QueryKind::Count => "not a count query",
                QueryKind::Exists => "not an exists query",
                QueryKind::Delete => "not a derived delete query",
                QueryKind::Mutation => "not a modifying query",
            },
        })
    }
}

/// Name → compiled query table of one repository.
#[derive(Debug, Clone)]
pub struct QueryRegistry {
    entity: &'static str,
    queries: BTreeMap<String, CompiledQuery>,
}

impl QueryRegistry {
    /// Compiles `definitions` against `schema`.
    ///
    /// # Errors
    /// - `UnsupportedDerivation` for a method name the grammar cannot map.
    /// - `DuplicateQuery` when two definitions share a name.
    /// - `UnknownQuery` for a missing named query.
    /// - `UnknownProperty` for an entity graph naming no relation.
    pub fn build(
        schema: &'static EntitySchema,
        named: &[NamedQuery],
        definitions: Vec<QueryDefinition>,
    ) -> RepoResult<Self> {
        let mut queries = BTreeMap::new();
        for definition in definitions {
            let compiled = compile(schema, named, definition)?;
            if queries.contains_key(&compiled.name) {
                return Err(RepoError::DuplicateQuery(compiled.name));
            }
            queries.insert(compiled.name.clone(), compiled);
        }
        info!(
            "event=repo_register module=repo status=ok entity={} queries={}",
            schema.name,
            queries.len()
        );
        Ok(Self {
            entity: schema.name,
            queries,
        })
    }

    /// # Errors
    /// - `UnknownQuery` when `name` was never registered.
    pub fn get(&self, name: &str) -> RepoResult<&CompiledQuery> {
        self.queries
            .get(name)
            .ok_or_else(|| RepoError::UnknownQuery(format!("{}.{name}", self.entity)))
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

fn compile(
    schema: &'static EntitySchema,
    named: &[NamedQuery],
    definition: QueryDefinition,
) -> RepoResult<CompiledQuery> {
    let join_fetch = FetchPlan::of(&as_strs(&definition.entity_graph)).resolve(schema)?;
    let inline_fetch = FetchPlan::of(&as_strs(&definition.fetch_joined)).resolve(schema)?;
    let count = definition.count_sql.as_deref().map(QueryTemplate::parse);

    let explicit_sql = match &definition.source {
        QuerySource::Explicit(sql) => Some(sql.clone()),
        QuerySource::Named(query) => Some(lookup_named(named, query)?.to_string()),
        QuerySource::Derived => {
            let qualified = format!("{}.{}", schema.name, definition.name);
            named
                .iter()
                .find(|candidate| candidate.name == qualified)
                .map(|candidate| candidate.sql.to_string())
        }
    };

    let mut compiled = match explicit_sql {
        Some(sql) => {
            let template = QueryTemplate::parse(&sql);
            CompiledQuery {
                name: definition.name.clone(),
                kind: if definition.modifying {
                    QueryKind::Mutation
                } else {
                    QueryKind::Select
                },
                joins_rows: template.has_join(),
                template,
                count,
                order: Vec::new(),
                limit: None,
                join_fetch,
                inline_fetch,
                hints: definition.hints,
                clear_policy: definition.clear_policy,
            }
        }
        None => {
            if definition.modifying {
                return Err(RepoError::InvalidQueryUsage {
                    query: definition.name,
                    reason: "derived queries cannot be modifying",
                });
            }
            let derived = derive_query(&definition.name, schema)?;
            let from = format!(
                "FROM {} {}{}",
                schema.table,
                schema.alias,
                derived.where_clause(schema.alias)
            );
            let select = format!(
                "SELECT {}{} {from}",
                if derived.distinct { "DISTINCT " } else { "" },
                schema.select_list(schema.alias)
            );
            let (kind, sql) = match derived.subject {
                QuerySubject::Find => (QueryKind::Select, select),
                QuerySubject::Delete => (QueryKind::Delete, select),
                QuerySubject::Count => (QueryKind::Count, format!("SELECT COUNT(*) {from}")),
                QuerySubject::Exists => (
                    QueryKind::Exists,
                    format!("SELECT EXISTS(SELECT 1 {from})"),
                ),
            };
            CompiledQuery {
                name: definition.name.clone(),
                kind,
                template: QueryTemplate::parse(&sql),
                count: count.or_else(|| {
                    Some(QueryTemplate::parse(&format!("SELECT COUNT(*) {from}")))
                }),
                order: derived.order,
                limit: derived.limit,
                join_fetch,
                inline_fetch,
                hints: definition.hints,
                clear_policy: definition.clear_policy,
                joins_rows: false,
            }
        }
    };

    if compiled.hints.lock != LockMode::None && compiled.kind != QueryKind::Select {
        return Err(RepoError::InvalidQueryUsage {
            query: compiled.name,
            reason: "lock hints apply to select queries only",
        });
    }
    if compiled.kind != QueryKind::Select {
        compiled.join_fetch.clear();
        compiled.inline_fetch.clear();
    }
    Ok(compiled)
}

fn lookup_named<'a>(named: &'a [NamedQuery], name: &str) -> RepoResult<&'a str> {
    named
        .iter()
        .find(|candidate| candidate.name == name)
        .map(|candidate| candidate.sql)
        .ok_or_else(|| RepoError::UnknownQuery(name.to_string()))
}

fn as_strs(paths: &[String]) -> Vec<&str> {
    paths.iter().map(String::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::{QueryDefinition, QueryKind, QueryRegistry};
    use crate::model::{Entity, Member, MEMBER_SCHEMA};
    use crate::repo::RepoError;
    use crate::storage::LockMode;

    fn build(definitions: Vec<QueryDefinition>) -> Result<QueryRegistry, RepoError> {
        QueryRegistry::build(&MEMBER_SCHEMA, Member::named_queries(), definitions)
    }

    #[test]
    fn derived_method_prefers_named_query() {
        let registry = build(vec![QueryDefinition::derived("findByUsername")]).unwrap();
        let query = registry.get("findByUsername").unwrap();
        assert_eq!(
            query.template.sql(),
            "SELECT m.* FROM members m WHERE m.username = :username"
        );
        assert_eq!(query.kind, QueryKind::Select);
    }

    #[test]
    fn derived_subjects_compile_to_their_kinds() {
        let registry = build(vec![
            QueryDefinition::derived("countByAge"),
            QueryDefinition::derived("existsByUsername"),
            QueryDefinition::derived("deleteByAgeLessThan"),
        ])
        .unwrap();
        let count = registry.get("countByAge").unwrap();
        assert_eq!(count.kind, QueryKind::Count);
        assert_eq!(
            count.template.sql(),
            "SELECT COUNT(*) FROM members m WHERE m.age = :age"
        );
        assert_eq!(registry.get("existsByUsername").unwrap().kind, QueryKind::Exists);
        assert_eq!(registry.get("deleteByAgeLessThan").unwrap().kind, QueryKind::Delete);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn unsupported_derivation_fails_registration() {
        let err = build(vec![
            QueryDefinition::derived("findByUsername"),
            QueryDefinition::derived("findByShoeSize"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            RepoError::UnsupportedDerivation { ref segment, .. } if segment == "ShoeSize"
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = build(vec![
            QueryDefinition::explicit("q", "SELECT m.* FROM members m"),
            QueryDefinition::explicit("q", "SELECT m.* FROM members m"),
        ])
        .unwrap_err();
        assert!(matches!(err, RepoError::DuplicateQuery(name) if name == "q"));
    }

    #[test]
    fn explicit_join_is_flagged_and_graph_resolved() {
        let registry = build(vec![QueryDefinition::explicit(
            "withTeam",
            "SELECT m.* FROM members m JOIN teams t ON t.id = m.team_id",
        )
        .entity_graph(&["team"])])
        .unwrap();
        let query = registry.get("withTeam").unwrap();
        assert!(query.joins_rows);
        assert!(query.count.is_none());
        assert_eq!(query.fetched().len(), 1);
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        assert!(matches!(
            build(vec![QueryDefinition::named("x", "Member.missing")]).unwrap_err(),
            RepoError::UnknownQuery(_)
        ));
        assert!(matches!(
            build(vec![QueryDefinition::derived("findByAge").entity_graph(&["age"])]).unwrap_err(),
            RepoError::UnknownProperty { .. }
        ));
        assert!(matches!(
            build(vec![
                QueryDefinition::derived("countByAge").lock(LockMode::PessimisticWrite)
            ])
            .unwrap_err(),
            RepoError::InvalidQueryUsage { .. }
        ));
        assert!(matches!(
            build(vec![QueryDefinition::derived("findByAge").modifying()]).unwrap_err(),
            RepoError::InvalidQueryUsage { .. }
        ));
    }
}
