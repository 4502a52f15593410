//! Explicit query templates with `:name` placeholders.
//!
//! # Invariants
//! - Placeholders inside single-quoted literals are ignored.
//! - Every placeholder must be bound at execution; there is no implicit null.
//! - A list value expands to one positional placeholder per element; an empty
//!   list renders `()` so `IN ()` matches nothing.

use crate::query::params::Params;
use crate::repo::{RepoError, RepoResult};
use crate::storage::BoundStatement;
use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"'(?:[^']|'')*'|:([A-Za-z_][A-Za-z0-9_]*)").expect("valid placeholder regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Sql(String),
    Param(String),
}

/// Parsed query text ready for binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    sql: String,
    segments: Vec<Segment>,
    params: Vec<String>,
}

impl QueryTemplate {
    pub fn parse(sql: &str) -> Self {
        let sql = sql.trim().trim_end_matches(';').trim_end().to_string();
        let mut segments = Vec::new();
        let mut params: Vec<String> = Vec::new();
        let mut cursor = 0;

        for captures in PLACEHOLDER_RE.captures_iter(&sql) {
            let Some(name) = captures.get(1) else {
                continue;
            };
            // `::` casts are not placeholders.
            let start = name.start() - 1;
            if start > 0 && sql.as_bytes()[start - 1] == b':' {
                continue;
            }
            if start > cursor {
                segments.push(Segment::Sql(sql[cursor..start].to_string()));
            }
            let name = name.as_str().to_string();
            if !params.contains(&name) {
                params.push(name.clone());
            }
            segments.push(Segment::Param(name));
            cursor = captures.get(0).map_or(start, |whole| whole.end());
        }
        if cursor < sql.len() {
            segments.push(Segment::Sql(sql[cursor..].to_string()));
        }

        Self {
            sql,
            segments,
            params,
        }
    }

    /// Normalized source text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Distinct parameter names in first-use order.
    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    /// Whether the query reads more than one table: a `JOIN` keyword or a
    /// comma-separated `FROM` list, outside string literals.
    pub fn has_join(&self) -> bool {
        // One flag per parenthesis depth: inside a FROM list at that depth.
        let mut in_from = vec![false];
        let mut word = String::new();
        for ch in strip_literals(&self.sql).chars().chain(std::iter::once(' ')) {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                word.push(ch);
                continue;
            }
            if !word.is_empty() {
                let keyword = word.to_ascii_lowercase();
                word.clear();
                match keyword.as_str() {
                    "join" => return true,
                    "from" => set_top(&mut in_from, true),
                    "where" | "group" | "order" | "having" | "limit" | "window" | "union"
                    | "intersect" | "except" | "on" | "using" => set_top(&mut in_from, false),
                    _ => {}
                }
            }
            match ch {
                '(' => in_from.push(false),
                ')' if in_from.len() > 1 => {
                    in_from.pop();
                }
                ',' if in_from.last().copied().unwrap_or(false) => return true,
                _ => {}
            }
        }
        false
    }

    /// Substitutes positional placeholders for every named parameter.
    ///
    /// # Errors
    /// - `UnboundParameter` naming the first parameter with no value.
    pub fn bind(&self, query: &str, params: &Params) -> RepoResult<BoundStatement> {
        let mut sql = String::with_capacity(self.sql.len());
        let mut values = Vec::new();
        for segment in &self.segments {
            match segment {
                Segment::Sql(text) => sql.push_str(text),
                Segment::Param(name) => {
                    let value = params.get(name).ok_or_else(|| RepoError::UnboundParameter {
                        query: query.to_string(),
                        name: name.clone(),
                    })?;
                    let placeholders = vec!["?"; value.placeholder_count()].join(", ");
                    if matches!(value, crate::query::ParamValue::List(_)) {
                        sql.push('(');
                        sql.push_str(&placeholders);
                        sql.push(')');
                    } else {
                        sql.push_str(&placeholders);
                    }
                    value.push_sql_values(&mut values);
                }
            }
        }
        Ok(BoundStatement::new(sql, values))
    }
}

fn set_top(stack: &mut [bool], value: bool) {
    if let Some(top) = stack.last_mut() {
        *top = value;
    }
}

fn strip_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quoted = false;
    for ch in text.chars() {
        if ch == '\'' {
            quoted = !quoted;
        } else if !quoted {
            out.push(ch);
        }
    }
    out
}
