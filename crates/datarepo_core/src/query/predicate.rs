//! Predicate tree produced by query derivation.

/// Comparison applied to one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Between,
    In,
    NotIn,
    Like,
    NotLike,
    StartingWith,
    EndingWith,
    Containing,
    NotContaining,
    IsNull,
    IsNotNull,
    True,
    False,
}

impl Comparator {
    /// Number of bound arguments the comparator consumes.
    pub fn arity(self) -> usize {
        match self {
            Self::Between => 2,
            Self::IsNull | Self::IsNotNull | Self::True | Self::False => 0,
            _ => 1,
        }
    }

    /// Whether `IgnoreCase` can apply to the comparison.
    pub fn supports_ignore_case(self) -> bool {
        matches!(
            self,
            Self::Equals
                | Self::NotEquals
                | Self::Like
                | Self::NotLike
                | Self::StartingWith
                | Self::EndingWith
                | Self::Containing
                | Self::NotContaining
        )
    }
}

/// One property comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub property: String,
    pub column: &'static str,
    pub comparator: Comparator,
    pub ignore_case: bool,
    /// Parameter names in argument order; length equals `comparator.arity()`.
    pub params: Vec<String>,
}

impl Condition {
    /// Renders the condition against `alias` using named placeholders.
    pub fn to_sql(&self, alias: &str) -> String {
        let column = format!("{alias}.{}", self.column);
        let lower = self.ignore_case && self.comparator.supports_ignore_case();
        let lhs = if lower {
            format!("LOWER({column})")
        } else {
            column
        };
        let arg = |index: usize| {
            let name = self.params.get(index).map_or("", String::as_str);
            if lower {
                format!("LOWER(:{name})")
            } else {
                format!(":{name}")
            }
        };

        match self.comparator {
            Comparator::Equals => format!("{lhs} = {}", arg(0)),
            Comparator::NotEquals => format!("{lhs} <> {}", arg(0)),
            Comparator::GreaterThan => format!("{lhs} > {}", arg(0)),
            Comparator::GreaterThanEqual => format!("{lhs} >= {}", arg(0)),
            Comparator::LessThan => format!("{lhs} < {}", arg(0)),
            Comparator::LessThanEqual => format!("{lhs} <= {}", arg(0)),
            Comparator::Between => format!("{lhs} BETWEEN {} AND {}", arg(0), arg(1)),
            Comparator::In => format!("{lhs} IN {}", arg(0)),
            Comparator::NotIn => format!("{lhs} NOT IN {}", arg(0)),
            Comparator::Like => format!("{lhs} LIKE {}", arg(0)),
            Comparator::NotLike => format!("{lhs} NOT LIKE {}", arg(0)),
            Comparator::StartingWith => format!("{lhs} LIKE {} || '%'", arg(0)),
            Comparator::EndingWith => format!("{lhs} LIKE '%' || {}", arg(0)),
            Comparator::Containing => format!("{lhs} LIKE '%' || {} || '%'", arg(0)),
            Comparator::NotContaining => format!("{lhs} NOT LIKE '%' || {} || '%'", arg(0)),
            Comparator::IsNull => format!("{lhs} IS NULL"),
            Comparator::IsNotNull => format!("{lhs} IS NOT NULL"),
            Comparator::True => format!("{lhs} = 1"),
            Comparator::False => format!("{lhs} = 0"),
        }
    }
}

/// Boolean combination of conditions.
///
/// Derivation builds a left-leaning tree: `a And b Or c` is `(a AND b) OR c`,
/// folded strictly left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Condition(Condition),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn and(self, right: Predicate) -> Self {
        Self::And(Box::new(self), Box::new(right))
    }

    pub fn or(self, right: Predicate) -> Self {
        Self::Or(Box::new(self), Box::new(right))
    }

    /// Every condition in left-to-right order.
    pub fn conditions(&self) -> Vec<&Condition> {
        match self {
            Self::Condition(condition) => vec![condition],
            Self::And(left, right) | Self::Or(left, right) => {
                let mut out = left.conditions();
                out.extend(right.conditions());
                out
            }
        }
    }

    pub fn to_sql(&self, alias: &str) -> String {
        match self {
            Self::Condition(condition) => condition.to_sql(alias),
            Self::And(left, right) => {
                format!("({} AND {})", left.to_sql(alias), right.to_sql(alias))
            }
            Self::Or(left, right) => {
                format!("({} OR {})", left.to_sql(alias), right.to_sql(alias))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Comparator, Condition, Predicate};

    fn condition(property: &str, comparator: Comparator, params: &[&str]) -> Predicate {
        Predicate::Condition(Condition {
            property: property.to_string(),
            column: "c",
            comparator,
            ignore_case: false,
            params: params.iter().map(|name| name.to_string()).collect(),
        })
    }

    #[test]
    fn fold_is_left_to_right_without_precedence() {
        let predicate = condition("a", Comparator::Equals, &["a"])
            .or(condition("b", Comparator::Equals, &["b"]))
            .and(condition("c", Comparator::Equals, &["c"]));
        assert_eq!(
            predicate.to_sql("m"),
            "((m.c = :a OR m.c = :b) AND m.c = :c)"
        );
        assert_eq!(predicate.conditions().len(), 3);
    }

    #[test]
    fn ignore_case_lowers_both_sides_for_text_only() {
        let mut text = Condition {
            property: "username".to_string(),
            column: "username",
            comparator: Comparator::Containing,
            ignore_case: true,
            params: vec!["username".to_string()],
        };
        assert_eq!(
            text.to_sql("m"),
            "LOWER(m.username) LIKE '%' || LOWER(:username) || '%'"
        );
        text.comparator = Comparator::GreaterThan;
        assert_eq!(text.to_sql("m"), "m.username > :username");
    }

    #[test]
    fn between_uses_two_parameters() {
        let predicate = condition("age", Comparator::Between, &["age_min", "age_max"]);
        assert_eq!(predicate.to_sql("m"), "m.c BETWEEN :age_min AND :age_max");
        assert_eq!(Comparator::Between.arity(), 2);
        assert_eq!(Comparator::IsNull.arity(), 0);
    }
}
