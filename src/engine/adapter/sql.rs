//! SQL Filter Compiler
//!
//! Compiles the query tree into a parameterized `WHERE` fragment over a JSON
//! document column, using SQLite's JSON1 functions.

use serde_json::Value;

use super::SqlValue;
use crate::engine::error::{Result, StoreError};
use crate::engine::query::{like, Comparison, ComparisonOperator, OrderBy, QueryCompiler};
use crate::engine::record::WriteCondition;

/// A compiled `WHERE` fragment and its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    pub clause: String,
    pub params: Vec<SqlValue>,
}

impl SqlFilter {
    pub fn new(clause: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            clause: clause.into(),
            params,
        }
    }

    /// Matches every row
    pub fn always() -> Self {
        Self::new("1", Vec::new())
    }

    /// Matches no row
    pub fn never() -> Self {
        Self::new("0", Vec::new())
    }
}

/// Quote an identifier (table or column name)
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render one object key as a JSON path step.
///
/// Quoted steps cannot contain `"`; such keys fall back to the bare form,
/// which runs up to the next `.` or `[`. Returns `None` for keys neither form
/// can express.
fn key_step(key: &str) -> Option<String> {
    if !key.contains('"') {
        return Some(format!(".\"{}\"", key));
    }
    if key.starts_with('"') || key.contains(['.', '[']) {
        return None;
    }
    Some(format!(".{}", key))
}

/// Render query segments as a JSON path: `["a", "0", "b"]` -> `$."a"[0]."b"`.
/// The first segment is always a record attribute; later all-digit segments
/// index arrays.
pub fn json_path(segments: &[String]) -> Result<String> {
    let mut path = String::from("$");
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(StoreError::QueryCompilation(format!(
                "empty attribute path segment in {:?}",
                segments.join(".")
            )));
        }
        if i > 0 && segment.chars().all(|c| c.is_ascii_digit()) {
            path.push_str(&format!("[{}]", segment));
            continue;
        }
        let step = key_step(segment).ok_or_else(|| {
            StoreError::QueryCompilation(format!("invalid attribute path segment: {:?}", segment))
        })?;
        path.push_str(&step);
    }
    Ok(path)
}

/// JSON path of a single top-level attribute, whatever its name looks like
pub fn attribute_path(attribute: &str) -> Result<String> {
    key_step(attribute)
        .map(|step| format!("${}", step))
        .ok_or_else(|| StoreError::InvalidAttribute(attribute.to_string()))
}

/// Compiles queries against the JSON document stored in `column`
#[derive(Debug, Clone)]
pub struct SqlCompiler {
    column: String,
}

impl Default for SqlCompiler {
    fn default() -> Self {
        Self::new("data")
    }
}

impl SqlCompiler {
    pub fn new(column: &str) -> Self {
        Self {
            column: quote_ident(column),
        }
    }

    fn extract(&self) -> String {
        format!("json_extract({}, ?)", self.column)
    }

    /// Scalar equality, or membership when the stored value is an array
    fn equals(&self, path: &str, value: &Value) -> SqlFilter {
        let col = &self.column;
        let bound = SqlValue::from_json(value);
        SqlFilter::new(
            format!(
                "(json_extract({col}, ?) = ? OR (json_type({col}, ?) = 'array' AND EXISTS \
                 (SELECT 1 FROM json_each({col}, ?) WHERE json_each.value = ?)))"
            ),
            vec![
                path.into(),
                bound.clone(),
                path.into(),
                path.into(),
                bound,
            ],
        )
    }

    /// `ORDER BY` fragment with a final `uuid` tie-breaker
    pub fn order_by(&self, order: &[OrderBy]) -> Result<SqlFilter> {
        let mut terms = Vec::with_capacity(order.len() + 1);
        let mut params = Vec::with_capacity(order.len());
        for o in order {
            terms.push(format!("{} {}", self.extract(), o.direction));
            params.push(SqlValue::Text(json_path(&o.field)?));
        }
        terms.push("uuid ASC".to_string());
        Ok(SqlFilter::new(terms.join(", "), params))
    }

    /// Record-level write condition
    pub fn condition(&self, condition: &WriteCondition) -> Result<SqlFilter> {
        Ok(SqlFilter::new(
            format!("{} IS ?", self.extract()),
            vec![
                attribute_path(&condition.field)?.into(),
                SqlValue::from_json(&condition.expected),
            ],
        ))
    }

    /// Require `attribute[index]` to exist and, optionally, satisfy an
    /// element-level condition
    pub fn item_condition(
        &self,
        attribute: &str,
        index: usize,
        condition: Option<&WriteCondition>,
    ) -> Result<SqlFilter> {
        let col = &self.column;
        let collection = attribute_path(attribute)?;
        let mut clause = format!(
            "json_type({col}, ?) = 'array' AND json_array_length({col}, ?) > ?"
        );
        let mut params = vec![
            collection.clone().into(),
            collection.clone().into(),
            SqlValue::Integer(index as i64),
        ];

        if let Some(cond) = condition {
            clause.push_str(&format!(" AND {} IS ?", self.extract()));
            params.push(SqlValue::Text(format!(
                "{}[{}]{}",
                collection,
                index,
                &attribute_path(&cond.field)?[1..]
            )));
            params.push(SqlValue::from_json(&cond.expected));
        }

        Ok(SqlFilter::new(clause, params))
    }
}

impl QueryCompiler for SqlCompiler {
    type Filter = SqlFilter;

    fn compile_comparison(&self, comparison: &Comparison) -> Result<SqlFilter> {
        let path = json_path(&comparison.attribute)?;
        let value = &comparison.value;

        Ok(match comparison.operator {
            ComparisonOperator::Equal | ComparisonOperator::Contains => self.equals(&path, value),
            ComparisonOperator::NotEqual => {
                let eq = self.equals(&path, value);
                SqlFilter::new(format!("NOT COALESCE({}, 0)", eq.clause), eq.params)
            }
            ComparisonOperator::Less
            | ComparisonOperator::LessOrEqual
            | ComparisonOperator::Greater
            | ComparisonOperator::GreaterOrEqual => SqlFilter::new(
                format!("{} {} ?", self.extract(), comparison.operator),
                vec![path.into(), SqlValue::from_json(value)],
            ),
            ComparisonOperator::In => {
                let Value::Array(values) = value else {
                    return Err(StoreError::QueryCompilation(format!(
                        "IN on {} expects a list, got {}",
                        comparison.path(),
                        value
                    )));
                };
                if values.is_empty() {
                    return Ok(SqlFilter::never());
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                let mut params = vec![SqlValue::Text(path)];
                params.extend(values.iter().map(SqlValue::from_json));
                SqlFilter::new(
                    format!("{} IN ({})", self.extract(), placeholders),
                    params,
                )
            }
            ComparisonOperator::Like => {
                let Value::String(pattern) = value else {
                    return Err(StoreError::QueryCompilation(format!(
                        "LIKE on {} expects a string pattern, got {}",
                        comparison.path(),
                        value
                    )));
                };
                SqlFilter::new(
                    format!(
                        "(json_type({col}, ?) = 'text' AND {} GLOB ?)",
                        self.extract(),
                        col = self.column
                    ),
                    vec![
                        path.clone().into(),
                        path.into(),
                        SqlValue::Text(like::to_glob(pattern)),
                    ],
                )
            }
        })
    }

    fn compile_and(&self, children: Vec<SqlFilter>) -> Result<SqlFilter> {
        Ok(join(children, " AND ", SqlFilter::always()))
    }

    fn compile_or(&self, children: Vec<SqlFilter>) -> Result<SqlFilter> {
        Ok(join(children, " OR ", SqlFilter::never()))
    }
}

fn join(children: Vec<SqlFilter>, separator: &str, empty: SqlFilter) -> SqlFilter {
    if children.is_empty() {
        return empty;
    }
    let mut clauses = Vec::with_capacity(children.len());
    let mut params = Vec::new();
    for child in children {
        clauses.push(child.clause);
        params.extend(child.params);
    }
    SqlFilter::new(format!("({})", clauses.join(separator)), params)
}
