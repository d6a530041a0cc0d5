//! Query model shared by every store adapter
//!
//! A [`Query`] describes which records (a filter [`Expression`] tree), in which
//! order, and how many. Adapters translate the tree into their native filter
//! through a [`QueryCompiler`]; the textual query grammar is parsed upstream.

pub mod like;
pub mod token;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use super::error::{Result, StoreError};
use super::record::Record;

/// Comparison operators understood by every adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "CONTAINS")]
    Contains,
    #[serde(rename = "LIKE")]
    Like,
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComparisonOperator::Equal => "=",
            ComparisonOperator::NotEqual => "!=",
            ComparisonOperator::Less => "<",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::Greater => ">",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::In => "IN",
            ComparisonOperator::Contains => "CONTAINS",
            ComparisonOperator::Like => "LIKE",
        };
        write!(f, "{}", s)
    }
}

/// A single `attribute OP value` test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Segmented path into nested attributes
    pub attribute: Vec<String>,
    pub operator: ComparisonOperator,
    pub value: Value,
}

impl Comparison {
    /// `path` is dot-separated: `"profile.address.city"`
    pub fn new(path: &str, operator: ComparisonOperator, value: impl Into<Value>) -> Self {
        Self {
            attribute: path.split('.').map(str::to_string).collect(),
            operator,
            value: value.into(),
        }
    }

    pub fn path(&self) -> String {
        self.attribute.join(".")
    }
}

/// Filter expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Expression {
    And { children: Vec<Expression> },
    Or { children: Vec<Expression> },
    Comparison(Comparison),
}

impl Expression {
    pub fn and(children: Vec<Expression>) -> Self {
        Expression::And { children }
    }

    pub fn or(children: Vec<Expression>) -> Self {
        Expression::Or { children }
    }

    pub fn compare(path: &str, operator: ComparisonOperator, value: impl Into<Value>) -> Self {
        Expression::Comparison(Comparison::new(path, operator, value))
    }

    pub fn eq(path: &str, value: impl Into<Value>) -> Self {
        Self::compare(path, ComparisonOperator::Equal, value)
    }

    pub fn ne(path: &str, value: impl Into<Value>) -> Self {
        Self::compare(path, ComparisonOperator::NotEqual, value)
    }

    pub fn contains(path: &str, value: impl Into<Value>) -> Self {
        Self::compare(path, ComparisonOperator::Contains, value)
    }

    pub fn like(path: &str, pattern: &str) -> Self {
        Self::compare(path, ComparisonOperator::Like, pattern)
    }

    pub fn is_in(path: &str, values: Vec<Value>) -> Self {
        Self::compare(path, ComparisonOperator::In, Value::Array(values))
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Sort key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: Vec<String>,
    #[serde(default)]
    pub direction: SortDirection,
}

/// What subset, what order, how many
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Filter tree; `None` matches every record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expression>,

    #[serde(default)]
    pub order_by: Vec<OrderBy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Opaque cursor from a previous [`FindResult`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, expression: Expression) -> Self {
        self.filter = Some(expression);
        self
    }

    pub fn order_by(mut self, path: &str, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: path.split('.').map(str::to_string).collect(),
            direction,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn continuation(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }

    /// Page size to apply; a zero limit could never advance a cursor
    pub fn page_limit(&self) -> Result<Option<usize>> {
        match self.limit {
            Some(0) => Err(StoreError::QueryCompilation(
                "limit must be at least 1".to_string(),
            )),
            limit => Ok(limit),
        }
    }
}

/// A page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FindResult {
    pub results: Vec<Record>,
    /// Present iff more results may exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

/// Translates the filter tree into an adapter's native filter form.
///
/// Adapters implement the three node compilers; `compile_comparison` must
/// match exhaustively on [`ComparisonOperator`]. Unsupported constructs are
/// reported as `StoreError::QueryCompilation` before anything executes.
pub trait QueryCompiler {
    type Filter;

    fn compile_comparison(&self, comparison: &Comparison) -> Result<Self::Filter>;

    fn compile_and(&self, children: Vec<Self::Filter>) -> Result<Self::Filter>;

    fn compile_or(&self, children: Vec<Self::Filter>) -> Result<Self::Filter>;

    fn compile(&self, expression: &Expression) -> Result<Self::Filter> {
        match expression {
            Expression::And { children } => {
                let compiled = children
                    .iter()
                    .map(|c| self.compile(c))
                    .collect::<Result<Vec<_>>>()?;
                self.compile_and(compiled)
            }
            Expression::Or { children } => {
                let compiled = children
                    .iter()
                    .map(|c| self.compile(c))
                    .collect::<Result<Vec<_>>>()?;
                self.compile_or(compiled)
            }
            Expression::Comparison(comparison) => self.compile_comparison(comparison),
        }
    }
}

/// Walk a segmented path through nested objects; numeric segments index arrays
pub fn resolve_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Compare two JSON values of the same kind
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            let a = a.as_f64()?;
            let b = b.as_f64()?;
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Total order used for sorting: missing and null first, then by value
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}
