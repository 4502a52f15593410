//! Named parameter values bound to query templates.

use rusqlite::types::Value;
use std::collections::BTreeMap;

/// Value bound to one `:name` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    /// Expands to one placeholder per element (`IN (?, ?, ...)`).
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Flattens into positional SQLite values.
    pub(crate) fn push_sql_values(&self, out: &mut Vec<Value>) {
        match self {
            Self::Null => out.push(Value::Null),
            Self::Integer(value) => out.push(Value::Integer(*value)),
            Self::Real(value) => out.push(Value::Real(*value)),
            Self::Text(value) => out.push(Value::Text(value.clone())),
            Self::Bool(value) => out.push(Value::Integer(i64::from(*value))),
            Self::List(items) => {
                for item in items {
                    item.push_sql_values(out);
                }
            }
        }
    }

    /// Number of positional placeholders this value occupies.
    pub(crate) fn placeholder_count(&self) -> usize {
        match self {
            Self::List(items) => items.iter().map(Self::placeholder_count).sum(),
            _ => 1,
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Clone + Into<ParamValue>> From<&[T]> for ParamValue {
    fn from(values: &[T]) -> Self {
        Self::List(values.iter().cloned().map(Into::into).collect())
    }
}

/// Named parameter set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Params::bind`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.bind(name, value);
        self
    }

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
