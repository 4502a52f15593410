//! Paged execution with a decoupled count query.
//!
//! # Invariants
//! - The count never sees join multiplicity. An explicit count query wins;
//!   without one a joining template is counted over its distinct rows,
//!   mirroring the `DISTINCT` wrapper put on its content query.
//! - A `Top`/`First` cap bounds both the total and the content.
//! - An offset at or past the total yields empty content without running the
//!   content query.

use crate::page::{Page, PageRequest};
use crate::query::Params;
use crate::repo::registry::CompiledQuery;
use crate::repo::RepoResult;
use crate::storage::BoundStatement;
use crate::uow::UnitOfWork;

/// Rows the content query must return for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: u64,
    pub offset: u64,
}

/// Counts, then loads one page through `load`.
///
/// `request.size` above `max_page_size` is clamped before anything runs.
///
/// # Errors
/// - Any error from binding, counting or `load`.
pub fn paginate<R>(
    uow: &mut UnitOfWork<'_>,
    query: &CompiledQuery,
    params: &Params,
    request: &PageRequest,
    max_page_size: u64,
    load: impl FnOnce(&mut UnitOfWork<'_>, PageWindow) -> RepoResult<Vec<R>>,
) -> RepoResult<Page<R>> {
    let request = request.clamped(max_page_size);
    let count = count_statement(query, params)?;
    let counted = u64::try_from(uow.fetch_scalar(&count)?).unwrap_or(0);
    let total = query.limit.map_or(counted, |cap| counted.min(cap));

    let offset = request.offset();
    if offset >= total {
        return Ok(Page::new(Vec::new(), &request, total));
    }
    let window = PageWindow {
        limit: request.size().min(total - offset),
        offset,
    };
    let content = load(uow, window)?;
    Ok(Page::new(content, &request, total))
}

fn count_statement(query: &CompiledQuery, params: &Params) -> RepoResult<BoundStatement> {
    if let Some(count) = &query.count {
        return count.bind(&query.name, params);
    }
    let base = query.template.bind(&query.name, params)?;
    let sql = if query.joins_rows {
        format!(
            "SELECT COUNT(*) FROM (SELECT DISTINCT root.* FROM ({}) AS root) AS counted",
            base.sql
        )
    } else {
        format!("SELECT COUNT(*) FROM ({}) AS counted", base.sql)
    };
    Ok(BoundStatement::new(sql, base.values))
}

#[cfg(test)]
mod tests {
    use super::count_statement;
    use crate::model::{Entity, Member, MEMBER_SCHEMA};
    use crate::query::Params;
    use crate::repo::registry::{QueryDefinition, QueryRegistry};

    fn registry() -> QueryRegistry {
        QueryRegistry::build(
            &MEMBER_SCHEMA,
            Member::named_queries(),
            vec![
                QueryDefinition::explicit("plain", "SELECT m.* FROM members m WHERE m.age = :age"),
                QueryDefinition::explicit(
                    "joined",
                    "SELECT m.* FROM members m LEFT JOIN teams t ON t.id = m.team_id",
                ),
                QueryDefinition::explicit(
                    "joinedCounted",
                    "SELECT m.* FROM members m LEFT JOIN teams t ON t.id = m.team_id",
                )
                .count_query("SELECT COUNT(*) FROM members"),
                QueryDefinition::derived("findByAge"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn plain_template_count_wraps_content_filter() {
        let registry = registry();
        let statement =
            count_statement(registry.get("plain").unwrap(), &Params::new().with("age", 10)).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT COUNT(*) FROM (SELECT m.* FROM members m WHERE m.age = ?) AS counted"
        );
    }

    #[test]
    fn derived_query_counts_without_select_list() {
        let registry = registry();
        let statement =
            count_statement(registry.get("findByAge").unwrap(), &Params::new().with("age", 10)).unwrap();
        assert_eq!(statement.sql, "SELECT COUNT(*) FROM members m WHERE m.age = ?");
    }

    #[test]
    fn joined_template_counts_distinct_rows_by_default() {
        let registry = registry();
        let statement = count_statement(registry.get("joined").unwrap(), &Params::new()).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT COUNT(*) FROM (SELECT DISTINCT root.* FROM \
             (SELECT m.* FROM members m LEFT JOIN teams t ON t.id = m.team_id) AS root) AS counted"
        );
    }

    #[test]
    fn explicit_count_query_takes_precedence() {
        let registry = registry();
        let statement =
            count_statement(registry.get("joinedCounted").unwrap(), &Params::new()).unwrap();
        assert_eq!(statement.sql, "SELECT COUNT(*) FROM members");
    }
}
