//! Query derivation from method names.
//!
//! # Responsibility
//! - Turn `<verb><subject>By<criteria>[OrderBy<orders>]` into a predicate
//!   tree, a result cap and an ordering.
//!
//! # Invariants
//! - Property names are matched longest-first against the entity schema.
//! - `And`/`Or` fold strictly left to right.
//! - Any segment the grammar cannot map fails with `UnsupportedDerivation`
//!   naming that segment; nothing is guessed.

use crate::model::EntitySchema;
use crate::page::{Direction, Order};
use crate::query::predicate::{Comparator, Condition, Predicate};
use crate::repo::{RepoError, RepoResult};
use once_cell::sync::Lazy;
use regex::Regex;

static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:First|Top)(\d*)(?:[A-Z]|$)").expect("valid limit regex"));

const SELECT_VERBS: &[&str] = &["find", "read", "get", "query", "search", "stream"];

/// Comparator keywords, longest alternatives first where one is a prefix of
/// another.
const COMPARATORS: &[(&str, Comparator)] = &[
    ("", Comparator::Equals),
    ("Equals", Comparator::Equals),
    ("Is", Comparator::Equals),
    ("Not", Comparator::NotEquals),
    ("IsNot", Comparator::NotEquals),
    ("GreaterThanEqual", Comparator::GreaterThanEqual),
    ("GreaterThan", Comparator::GreaterThan),
    ("LessThanEqual", Comparator::LessThanEqual),
    ("LessThan", Comparator::LessThan),
    ("After", Comparator::GreaterThan),
    ("Before", Comparator::LessThan),
    ("Between", Comparator::Between),
    ("In", Comparator::In),
    ("NotIn", Comparator::NotIn),
    ("Like", Comparator::Like),
    ("NotLike", Comparator::NotLike),
    ("StartingWith", Comparator::StartingWith),
    ("StartsWith", Comparator::StartingWith),
    ("EndingWith", Comparator::EndingWith),
    ("EndsWith", Comparator::EndingWith),
    ("Containing", Comparator::Containing),
    ("Contains", Comparator::Containing),
    ("NotContaining", Comparator::NotContaining),
    ("NotContains", Comparator::NotContaining),
    ("IsNull", Comparator::IsNull),
    ("Null", Comparator::IsNull),
    ("IsNotNull", Comparator::IsNotNull),
    ("NotNull", Comparator::IsNotNull),
    ("True", Comparator::True),
    ("False", Comparator::False),
];

/// What a derived method does with the matching rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySubject {
    Find,
    Count,
    Exists,
    Delete,
}

/// Result of parsing one method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedQuery {
    pub method: String,
    pub subject: QuerySubject,
    pub distinct: bool,
    /// `First`/`Top` cap.
    pub limit: Option<u64>,
    pub predicate: Option<Predicate>,
    pub order: Vec<Order>,
    /// Parameter names in argument order.
    pub params: Vec<String>,
}

impl DerivedQuery {
    /// `WHERE ...` clause (with leading space) or an empty string.
    pub fn where_clause(&self, alias: &str) -> String {
        self.predicate
            .as_ref()
            .map(|predicate| format!(" WHERE {}", predicate.to_sql(alias)))
            .unwrap_or_default()
    }
}

/// Parses `method` against the properties of `schema`.
///
/// # Errors
/// - `UnsupportedDerivation` naming the first segment that cannot be mapped.
pub fn derive_query(method: &str, schema: &EntitySchema) -> RepoResult<DerivedQuery> {
    let unsupported = |segment: &str| RepoError::UnsupportedDerivation {
        method: method.to_string(),
        segment: segment.to_string(),
    };
    if method.is_empty() || !method.is_ascii() {
        return Err(unsupported(method));
    }

    let (subject, rest) = split_verb(method).ok_or_else(|| unsupported(method))?;
    let (subject_text, criteria) = match find_keyword(rest, "By", 0) {
        Some(index) => (&rest[..index], &rest[index + 2..]),
        None => (rest, ""),
    };

    let distinct = subject_text.contains("Distinct");
    let limit = match LIMIT_RE.captures(subject_text) {
        Some(captures) => {
            let digits = captures.get(1).map_or("", |m| m.as_str());
            let limit = if digits.is_empty() {
                1
            } else {
                digits.parse::<u64>().map_err(|_| unsupported(subject_text))?
            };
            if limit == 0 {
                return Err(unsupported(subject_text));
            }
            Some(limit)
        }
        None => None,
    };

    let (predicate_text, order_text) = match find_keyword(criteria, "OrderBy", 0) {
        Some(index) => (&criteria[..index], Some(&criteria[index + 7..])),
        None => (criteria, None),
    };

    let properties = candidate_properties(schema);
    let mut params = Vec::new();
    let predicate = if predicate_text.is_empty() {
        None
    } else {
        Some(parse_predicate(
            predicate_text,
            schema,
            &properties,
            &mut params,
            &unsupported,
        )?)
    };
    let order = match order_text {
        Some(text) => parse_order(text, &properties, &unsupported)?,
        None => Vec::new(),
    };

    Ok(DerivedQuery {
        method: method.to_string(),
        subject,
        distinct,
        limit,
        predicate,
        order,
        params,
    })
}

fn split_verb(method: &str) -> Option<(QuerySubject, &str)> {
    let verbs = SELECT_VERBS
        .iter()
        .map(|verb| (*verb, QuerySubject::Find))
        .chain([
            ("count", QuerySubject::Count),
            ("exists", QuerySubject::Exists),
            ("delete", QuerySubject::Delete),
            ("remove", QuerySubject::Delete),
        ]);
    for (verb, subject) in verbs {
        if let Some(rest) = method.strip_prefix(verb) {
            if rest.is_empty() || starts_uppercase(rest) {
                return Some((subject, rest));
            }
        }
    }
    None
}

/// Index of the first `keyword` at or after `from` that is followed by an
/// uppercase letter or the end of the text.
fn find_keyword(text: &str, keyword: &str, from: usize) -> Option<usize> {
    let mut start = from;
    while let Some(offset) = text.get(start..)?.find(keyword) {
        let index = start + offset;
        let after = &text[index + keyword.len()..];
        if after.is_empty() || starts_uppercase(after) {
            return Some(index);
        }
        start = index + 1;
    }
    None
}

fn starts_uppercase(text: &str) -> bool {
    text.as_bytes().first().is_some_and(u8::is_ascii_uppercase)
}

/// `(Capitalized, property)` pairs, longest first.
fn candidate_properties(schema: &EntitySchema) -> Vec<(String, &'static str)> {
    let mut candidates = schema
        .properties()
        .into_iter()
        .map(|property| (capitalize(property), property))
        .collect::<Vec<_>>();
    candidates.sort_by(|left, right| right.0.len().cmp(&left.0.len()));
    candidates
}

fn capitalize(property: &str) -> String {
    let mut chars = property.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn match_property<'p>(
    text: &str,
    properties: &'p [(String, &'static str)],
) -> Option<(&'p str, &'static str)> {
    properties
        .iter()
        .find(|(capitalized, _)| text.starts_with(capitalized.as_str()))
        .map(|(capitalized, property)| (capitalized.as_str(), *property))
}

#[derive(Clone, Copy)]
enum Connector {
    And,
    Or,
}

fn parse_predicate(
    text: &str,
    schema: &EntitySchema,
    properties: &[(String, &'static str)],
    params: &mut Vec<String>,
    unsupported: &dyn Fn(&str) -> RepoError,
) -> RepoResult<Predicate> {
    let mut predicate: Option<Predicate> = None;
    let mut pending: Option<Connector> = None;
    let mut rest = text;

    loop {
        let part_end = next_connector(rest).map_or(rest.len(), |(index, _)| index);
        let part = &rest[..part_end];
        let condition = parse_condition(part, schema, properties, params, unsupported)?;
        let node = Predicate::Condition(condition);
        predicate = Some(match (predicate, pending) {
            (None, _) => node,
            (Some(left), Some(Connector::Or)) => left.or(node),
            (Some(left), _) => left.and(node),
        });

        match next_connector(rest) {
            Some((index, connector)) => {
                let width = match connector {
                    Connector::And => 3,
                    Connector::Or => 2,
                };
                rest = &rest[index + width..];
                pending = Some(connector);
            }
            None => break,
        }
    }

    predicate.ok_or_else(|| unsupported(text))
}

/// First `And`/`Or` boundary that is not part of a property name.
fn next_connector(text: &str) -> Option<(usize, Connector)> {
    // A condition always starts with a property; connectors are searched
    // after the leading capital so `Order...` style names are not split.
    let and = find_keyword(text, "And", 1).map(|index| (index, Connector::And));
    let or = find_keyword(text, "Or", 1).map(|index| (index, Connector::Or));
    match (and, or) {
        (Some(a), Some(o)) => Some(if a.0 <= o.0 { a } else { o }),
        (found, None) | (None, found) => found,
    }
}

fn parse_condition(
    part: &str,
    schema: &EntitySchema,
    properties: &[(String, &'static str)],
    params: &mut Vec<String>,
    unsupported: &dyn Fn(&str) -> RepoError,
) -> RepoResult<Condition> {
    let (capitalized, property) =
        match_property(part, properties).ok_or_else(|| unsupported(part))?;
    let column = schema
        .column_for(property)
        .ok_or_else(|| unsupported(part))?;

    let mut suffix = &part[capitalized.len()..];
    let mut ignore_case = false;
    for marker in ["IgnoreCase", "IgnoringCase"] {
        if let Some(stripped) = suffix.strip_suffix(marker) {
            suffix = stripped;
            ignore_case = true;
            break;
        }
    }

    let comparator = lookup_comparator(suffix)
        .or_else(|| suffix.strip_prefix("Is").and_then(lookup_comparator))
        .ok_or_else(|| unsupported(suffix))?;
    if ignore_case && !comparator.supports_ignore_case() {
        return Err(unsupported(part));
    }

    let names = match comparator.arity() {
        0 => Vec::new(),
        2 => vec![
            unique_param(params, format!("{property}_min")),
            unique_param(params, format!("{property}_max")),
        ],
        _ => vec![unique_param(params, property.to_string())],
    };

    Ok(Condition {
        property: property.to_string(),
        column,
        comparator,
        ignore_case,
        params: names,
    })
}

fn lookup_comparator(keyword: &str) -> Option<Comparator> {
    COMPARATORS
        .iter()
        .find(|(name, _)| *name == keyword)
        .map(|(_, comparator)| *comparator)
}

fn unique_param(params: &mut Vec<String>, base: String) -> String {
    let mut name = base.clone();
    let mut suffix = 2;
    while params.contains(&name) {
        name = format!("{base}_{suffix}");
        suffix += 1;
    }
    params.push(name.clone());
    name
}

fn parse_order(
    text: &str,
    properties: &[(String, &'static str)],
    unsupported: &dyn Fn(&str) -> RepoError,
) -> RepoResult<Vec<Order>> {
    if text.is_empty() {
        return Err(unsupported("OrderBy"));
    }
    let mut orders = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let (capitalized, property) =
            match_property(rest, properties).ok_or_else(|| unsupported(rest))?;
        rest = &rest[capitalized.len()..];
        let direction = if let Some(tail) = rest.strip_prefix("Desc") {
            rest = tail;
            Direction::Desc
        } else if let Some(tail) = rest.strip_prefix("Asc") {
            rest = tail;
            Direction::Asc
        } else {
            Direction::Asc
        };
        orders.push(Order::new(property, direction));
    }
    Ok(orders)
}

#[cfg(test)]
mod tests {
    use super::{derive_query, QuerySubject};
    use crate::model::MEMBER_SCHEMA;
    use crate::page::Direction;
    use crate::query::predicate::{Comparator, Predicate};
    use crate::repo::RepoError;

    #[test]
    fn and_greater_than_builds_two_conditions() {
        let query = derive_query("findByUsernameAndAgeGreaterThan", &MEMBER_SCHEMA).unwrap();
        assert_eq!(query.subject, QuerySubject::Find);
        assert_eq!(query.params, ["username", "age"]);
        let predicate = query.predicate.unwrap();
        assert_eq!(
            predicate.to_sql("m"),
            "(m.username = :username AND m.age > :age)"
        );
    }

    #[test]
    fn top_n_without_criteria() {
        let query = derive_query("findTop3HelloBy", &MEMBER_SCHEMA).unwrap();
        assert_eq!(query.limit, Some(3));
        assert!(query.predicate.is_none());
        assert!(query.params.is_empty());

        let first = derive_query("findFirstByOrderByAgeDesc", &MEMBER_SCHEMA).unwrap();
        assert_eq!(first.limit, Some(1));
        assert_eq!(first.order.len(), 1);
        assert_eq!(first.order[0].direction, Direction::Desc);
    }

    #[test]
    fn top_zero_is_rejected() {
        let err = derive_query("findTop0By", &MEMBER_SCHEMA).unwrap_err();
        assert!(matches!(err, RepoError::UnsupportedDerivation { .. }));
    }

    #[test]
    fn or_and_fold_left_to_right() {
        let query = derive_query("findByAgeLessThanOrUsernameAndAgeGreaterThan", &MEMBER_SCHEMA)
            .unwrap();
        assert_eq!(query.params, ["age", "username", "age_2"]);
        match query.predicate.unwrap() {
            Predicate::And(left, _) => assert!(matches!(*left, Predicate::Or(_, _))),
            other => panic!("expected And at the root, got {other:?}"),
        }
    }

    #[test]
    fn comparator_keywords_and_modifiers() {
        let query = derive_query(
            "findDistinctByUsernameStartingWithIgnoreCaseAndAgeBetweenAndTeamIsNull",
            &MEMBER_SCHEMA,
        )
        .unwrap();
        assert!(query.distinct);
        assert_eq!(query.params, ["username", "age_min", "age_max"]);
        let conditions = query.predicate.as_ref().unwrap().conditions();
        assert_eq!(conditions[0].comparator, Comparator::StartingWith);
        assert!(conditions[0].ignore_case);
        assert_eq!(conditions[1].comparator, Comparator::Between);
        assert_eq!(conditions[2].comparator, Comparator::IsNull);
        assert_eq!(conditions[2].column, "team_id");
    }

    #[test]
    fn ignore_case_only_on_text_comparisons() {
        for method in ["findByUsernameInIgnoreCase", "findByAgeGreaterThanIgnoreCase"] {
            match derive_query(method, &MEMBER_SCHEMA).unwrap_err() {
                RepoError::UnsupportedDerivation { segment, .. } => {
                    assert!(segment.ends_with("IgnoreCase"), "{segment}");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert!(derive_query("findByUsernameIgnoringCase", &MEMBER_SCHEMA).is_ok());
    }

    #[test]
    fn subject_verbs() {
        assert_eq!(
            derive_query("countByAge", &MEMBER_SCHEMA).unwrap().subject,
            QuerySubject::Count
        );
        assert_eq!(
            derive_query("existsByUsername", &MEMBER_SCHEMA).unwrap().subject,
            QuerySubject::Exists
        );
        assert_eq!(
            derive_query("removeByAgeIn", &MEMBER_SCHEMA).unwrap().subject,
            QuerySubject::Delete
        );
        assert_eq!(
            derive_query("readByIdNot", &MEMBER_SCHEMA).unwrap().subject,
            QuerySubject::Find
        );
    }

    #[test]
    fn unknown_property_names_the_segment() {
        let err = derive_query("findByNicknameAndAge", &MEMBER_SCHEMA).unwrap_err();
        match err {
            RepoError::UnsupportedDerivation { method, segment } => {
                assert_eq!(method, "findByNicknameAndAge");
                assert_eq!(segment, "Nickname");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unknown_comparator_names_the_segment() {
        let err = derive_query("findByAgeRoughly", &MEMBER_SCHEMA).unwrap_err();
        assert!(matches!(
            err,
            RepoError::UnsupportedDerivation { ref segment, .. } if segment == "Roughly"
        ));
    }

    #[test]
    fn unknown_verb_and_non_ascii_are_rejected() {
        assert!(derive_query("fetchByAge", &MEMBER_SCHEMA).is_err());
        assert!(derive_query("findByÄge", &MEMBER_SCHEMA).is_err());
        assert!(derive_query("findByAgeOrderBy", &MEMBER_SCHEMA).is_err());
    }
}
