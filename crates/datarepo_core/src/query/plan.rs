//! Outer select that adds fetch joins, ordering and bounds to a bound query.
//!
//! The base query is used as a derived table named `root`, so ordering and
//! limits apply to whatever the base selects, explicit templates included.

use crate::model::{EntitySchema, RelationDef};
use crate::page::{Direction, Order};
use crate::repo::{RepoError, RepoResult};
use crate::storage::BoundStatement;

#[derive(Debug, Clone)]
pub struct SelectPlan {
    schema: &'static EntitySchema,
    joins: Vec<&'static RelationDef>,
    order: Vec<Order>,
    limit: Option<u64>,
    offset: u64,
    distinct: bool,
}

impl SelectPlan {
    pub fn new(schema: &'static EntitySchema) -> Self {
        Self {
            schema,
            joins: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: 0,
            distinct: false,
        }
    }

    /// Relations whose target row is selected next to every root row.
    pub fn joins(mut self, joins: &[&'static RelationDef]) -> Self {
        self.joins.extend_from_slice(joins);
        self
    }

    /// Appends orderings; earlier ones take precedence.
    pub fn order(mut self, order: impl IntoIterator<Item = Order>) -> Self {
        self.order.extend(order);
        self
    }

    pub fn limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Collapses identical rows, e.g. an owner repeated by a one-to-many join.
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// Wraps `base`. A plan that adds nothing returns `base` unchanged.
    ///
    /// # Errors
    /// - `UnknownProperty` when an ordering names no property of the entity.
    pub fn wrap(&self, base: BoundStatement) -> RepoResult<BoundStatement> {
        if !self.distinct
            && self.joins.is_empty()
            && self.order.is_empty()
            && self.limit.is_none()
            && self.offset == 0
        {
            return Ok(base);
        }

        let mut sql = String::from(if self.distinct {
            "SELECT DISTINCT root.*"
        } else {
            "SELECT root.*"
        });
        for relation in &self.joins {
            let target = (relation.target)();
            sql.push_str(", ");
            sql.push_str(&target.prefixed_select_list(&relation.join_alias(), &relation.column_prefix()));
        }
        sql.push_str(" FROM (");
        sql.push_str(&base.sql);
        sql.push_str(") AS root");
        for relation in &self.joins {
            let target = (relation.target)();
            let alias = relation.join_alias();
            sql.push_str(&format!(
                " LEFT JOIN {} AS {alias} ON {alias}.{} = root.{}",
                target.table, target.id_column, relation.join_column
            ));
        }

        if !self.order.is_empty() {
            let clauses = self
                .order
                .iter()
                .map(|order| {
                    let column = self.schema.column_for(&order.property).ok_or_else(|| {
                        RepoError::UnknownProperty {
                            entity: self.schema.name,
                            property: order.property.clone(),
                        }
                    })?;
                    let direction = match order.direction {
                        Direction::Asc => "ASC",
                        Direction::Desc => "DESC",
                    };
                    Ok(format!("root.\"{column}\" {direction}"))
                })
                .collect::<RepoResult<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&clauses.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), 0) => sql.push_str(&format!(" LIMIT {limit}")),
            (Some(limit), offset) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (None, 0) => {}
            (None, offset) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        }

        Ok(BoundStatement::new(sql, base.values))
    }
}
