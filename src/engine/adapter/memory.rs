//! In-Memory Adapter
//!
//! Implements Store over a `BTreeMap` guarded by a `RwLock`. Every conditional
//! mutation checks and applies under a single write guard, which is what makes
//! it atomic. Used for tests, development, and as the reference adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::engine::error::{Result, StoreError};
use crate::engine::query::token::OffsetToken;
use crate::engine::query::{
    compare_values, like, resolve_path, sort_order, Comparison, ComparisonOperator, FindResult,
    Query, QueryCompiler, SortDirection,
};
use crate::engine::record::{
    add_numbers, merge_increments, values_equal, Increment, Record, WriteCondition,
};
use crate::engine::store::Store;

type Storage = BTreeMap<String, Record>;

/// Native filter of the in-memory adapter: a predicate tree over JSON
#[derive(Debug, Clone)]
pub enum MemoryFilter {
    All(Vec<MemoryFilter>),
    Any(Vec<MemoryFilter>),
    /// Exact match on scalars, membership on lists
    Equals { path: Vec<String>, value: Value },
    NotEquals { path: Vec<String>, value: Value },
    Compare {
        path: Vec<String>,
        operator: ComparisonOperator,
        value: Value,
    },
    In { path: Vec<String>, values: Vec<Value> },
    Matches { path: Vec<String>, pattern: Regex },
}

impl MemoryFilter {
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            MemoryFilter::All(children) => children.iter().all(|c| c.matches(doc)),
            MemoryFilter::Any(children) => children.iter().any(|c| c.matches(doc)),
            MemoryFilter::Equals { path, value } => {
                resolve_path(doc, path).is_some_and(|actual| equals_or_contains(actual, value))
            }
            MemoryFilter::NotEquals { path, value } => {
                !resolve_path(doc, path).is_some_and(|actual| equals_or_contains(actual, value))
            }
            MemoryFilter::Compare {
                path,
                operator,
                value,
            } => {
                let Some(ordering) = resolve_path(doc, path).and_then(|a| compare_values(a, value))
                else {
                    return false;
                };
                match operator {
                    ComparisonOperator::Less => ordering.is_lt(),
                    ComparisonOperator::LessOrEqual => ordering.is_le(),
                    ComparisonOperator::Greater => ordering.is_gt(),
                    ComparisonOperator::GreaterOrEqual => ordering.is_ge(),
                    _ => false,
                }
            }
            MemoryFilter::In { path, values } => resolve_path(doc, path)
                .is_some_and(|actual| values.iter().any(|v| values_equal(actual, v))),
            MemoryFilter::Matches { path, pattern } => match resolve_path(doc, path) {
                Some(Value::String(s)) => pattern.is_match(s),
                _ => false,
            },
        }
    }
}

fn equals_or_contains(actual: &Value, expected: &Value) -> bool {
    if values_equal(actual, expected) {
        return true;
    }
    match actual {
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        _ => false,
    }
}

/// Compiles the query tree into a [`MemoryFilter`]
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryCompiler;

impl QueryCompiler for MemoryCompiler {
    type Filter = MemoryFilter;

    fn compile_comparison(&self, comparison: &Comparison) -> Result<MemoryFilter> {
        let path = comparison.attribute.clone();
        let value = comparison.value.clone();

        Ok(match comparison.operator {
            ComparisonOperator::Equal | ComparisonOperator::Contains => {
                MemoryFilter::Equals { path, value }
            }
            ComparisonOperator::NotEqual => MemoryFilter::NotEquals { path, value },
            ComparisonOperator::Less
            | ComparisonOperator::LessOrEqual
            | ComparisonOperator::Greater
            | ComparisonOperator::GreaterOrEqual => MemoryFilter::Compare {
                path,
                operator: comparison.operator,
                value,
            },
            ComparisonOperator::In => match value {
                Value::Array(values) => MemoryFilter::In { path, values },
                other => {
                    return Err(StoreError::QueryCompilation(format!(
                        "IN on {} expects a list, got {}",
                        comparison.path(),
                        other
                    )))
                }
            },
            ComparisonOperator::Like => match value {
                Value::String(pattern) => {
                    let pattern = Regex::new(&like::to_regex(&pattern))
                        .map_err(|e| StoreError::QueryCompilation(e.to_string()))?;
                    MemoryFilter::Matches { path, pattern }
                }
                other => {
                    return Err(StoreError::QueryCompilation(format!(
                        "LIKE on {} expects a string pattern, got {}",
                        comparison.path(),
                        other
                    )))
                }
            },
        })
    }

    fn compile_and(&self, children: Vec<MemoryFilter>) -> Result<MemoryFilter> {
        Ok(MemoryFilter::All(children))
    }

    fn compile_or(&self, children: Vec<MemoryFilter>) -> Result<MemoryFilter> {
        Ok(MemoryFilter::Any(children))
    }
}

/// In-memory store backed by a BTreeMap. Clone-friendly via Arc.
#[derive(Clone)]
pub struct MemoryStore {
    name: String,
    storage: Arc<RwLock<Storage>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            storage: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Number of stored records
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Storage>> {
        self.storage
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Storage>> {
        self.storage
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))
    }

    /// Find the record a mutation targets, enforcing the record-level condition
    fn locate<'a>(
        &self,
        storage: &'a mut Storage,
        uid: &str,
        condition: Option<&WriteCondition>,
    ) -> Result<&'a mut Record> {
        let Some(record) = storage.get_mut(uid) else {
            return Err(match condition {
                Some(cond) => self.condition_failed(uid, cond),
                None => StoreError::RecordNotFound(uid.to_string()),
            });
        };

        if let Some(cond) = condition {
            if !cond.holds(record.field_value(&cond.field).as_ref()) {
                return Err(self.condition_failed(uid, cond));
            }
        }

        Ok(record)
    }

    fn condition_failed(&self, uid: &str, cond: &WriteCondition) -> StoreError {
        warn!(store = %self.name, uid, field = %cond.field, "update condition failed");
        StoreError::condition_failed(uid, &cond.field, &cond.expected)
    }

    /// Address a collection element, enforcing the element-level condition
    fn locate_item<'a>(
        &self,
        record: &'a mut Record,
        attribute: &str,
        index: usize,
        condition: Option<&WriteCondition>,
    ) -> Result<&'a mut Value> {
        let uid = record.uuid.clone();
        let slot = match record.data.get_mut(attribute) {
            Some(Value::Array(items)) => items.get_mut(index),
            _ => None,
        };

        let Some(slot) = slot else {
            let field = condition.map_or_else(|| format!("{}[{}]", attribute, index), |c| c.field.clone());
            let expected = condition.map_or(Value::Null, |c| c.expected.clone());
            warn!(store = %self.name, uid = %uid, attribute, index, "collection slot not found");
            return Err(StoreError::condition_failed(&uid, &field, &expected));
        };

        if let Some(cond) = condition {
            let actual = match &*slot {
                Value::Object(map) => map.get(&cond.field),
                _ => None,
            };
            if !cond.holds(actual) {
                return Err(self.condition_failed(&uid, cond));
            }
        }

        Ok(slot)
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, uid: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(uid))
    }

    async fn get(&self, uid: &str) -> Result<Option<Record>> {
        Ok(self.read()?.get(uid).cloned())
    }

    async fn get_all(&self, uids: Option<&[String]>) -> Result<Vec<Record>> {
        let storage = self.read()?;
        Ok(match uids {
            Some(uids) => uids.iter().filter_map(|id| storage.get(id).cloned()).collect(),
            None => storage.values().cloned().collect(),
        })
    }

    async fn find(&self, query: &Query) -> Result<FindResult> {
        let filter = query
            .filter
            .as_ref()
            .map(|expr| MemoryCompiler.compile(expr))
            .transpose()?;
        let offset = OffsetToken::start(query.continuation_token.as_deref())?;
        let limit = query.page_limit()?;
        debug!(store = %self.name, ?filter, offset, "memory find");

        let mut matched: Vec<(Value, &Record)> = Vec::new();
        let storage = self.read()?;
        for record in storage.values() {
            let doc = record.to_value();
            if filter.as_ref().map_or(true, |f| f.matches(&doc)) {
                matched.push((doc, record));
            }
        }

        matched.sort_by(|(a_doc, a), (b_doc, b)| {
            for order in &query.order_by {
                let ordering = sort_order(
                    resolve_path(a_doc, &order.field),
                    resolve_path(b_doc, &order.field),
                );
                let ordering = match order.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
            a.uuid.cmp(&b.uuid)
        });

        let remaining = matched.len().saturating_sub(offset);
        let take = limit.unwrap_or(remaining);
        let results: Vec<Record> = matched
            .into_iter()
            .skip(offset)
            .take(take)
            .map(|(_, r)| r.clone())
            .collect();

        let continuation_token = if remaining > take {
            Some(OffsetToken::new(offset.saturating_add(take)).encode())
        } else {
            None
        };

        Ok(FindResult {
            results,
            continuation_token,
        })
    }

    async fn save(&self, record: Record) -> Result<Record> {
        let record = record.stamped();
        self.write()?.insert(record.uuid.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, record: Record, condition: Option<&WriteCondition>) -> Result<Record> {
        let record = record.stamped();
        let mut storage = self.write()?;
        let stored = self.locate(&mut storage, &record.uuid, condition)?;
        *stored = record.clone();
        Ok(record)
    }

    async fn patch(&self, partial: Record, condition: Option<&WriteCondition>) -> Result<()> {
        let partial = partial.stamped();
        let mut storage = self.write()?;
        let stored = self.locate(&mut storage, &partial.uuid, condition)?;
        stored.data.extend(partial.data);
        stored.last_update = partial.last_update;
        Ok(())
    }

    async fn delete(&self, uid: &str, condition: Option<&WriteCondition>) -> Result<()> {
        let mut storage = self.write()?;
        if condition.is_none() {
            storage.remove(uid);
            return Ok(());
        }
        self.locate(&mut storage, uid, condition)?;
        storage.remove(uid);
        Ok(())
    }

    async fn remove_attribute(
        &self,
        uid: &str,
        attribute: &str,
        condition: Option<&WriteCondition>,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let mut storage = self.write()?;
        let stored = self.locate(&mut storage, uid, condition)?;
        stored.remove(attribute);
        stored.touch(ts);
        Ok(())
    }

    async fn increment_attributes(
        &self,
        uid: &str,
        increments: &[Increment],
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let mut storage = self.write()?;
        let stored = self.locate(&mut storage, uid, None)?;

        // Compute every new value before touching the record so the batch
        // applies entirely or not at all
        let mut updates = Vec::with_capacity(increments.len());
        for inc in merge_increments(increments) {
            let next = match stored.get(&inc.property) {
                None | Some(Value::Null) => Some(inc.value.clone()),
                Some(Value::Number(current)) => add_numbers(current, &inc.value),
                Some(_) => None,
            }
            .ok_or_else(|| {
                StoreError::Backend(format!("attribute {} is not numeric", inc.property))
            })?;
            updates.push((inc.property, Value::Number(next)));
        }

        for (property, value) in updates {
            stored.set(&property, value);
        }
        stored.touch(ts);
        Ok(())
    }

    async fn upsert_item_to_collection(
        &self,
        uid: &str,
        attribute: &str,
        item: Value,
        index: Option<usize>,
        condition: Option<&WriteCondition>,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let mut storage = self.write()?;
        let Some(stored) = storage.get_mut(uid) else {
            return Err(match condition {
                Some(cond) => self.condition_failed(uid, cond),
                None => StoreError::RecordNotFound(uid.to_string()),
            });
        };

        match index {
            None => {
                let collection = stored
                    .data
                    .entry(attribute.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                match collection {
                    Value::Array(items) => items.push(item),
                    Value::Null => *collection = Value::Array(vec![item]),
                    _ => {
                        return Err(StoreError::Backend(format!(
                            "attribute {} is not a collection",
                            attribute
                        )))
                    }
                }
            }
            Some(index) => {
                let slot = self.locate_item(stored, attribute, index, condition)?;
                *slot = item;
            }
        }

        stored.touch(ts);
        Ok(())
    }

    async fn clear_collection_item(
        &self,
        uid: &str,
        attribute: &str,
        index: usize,
        condition: &WriteCondition,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let mut storage = self.write()?;
        let Some(stored) = storage.get_mut(uid) else {
            return Err(self.condition_failed(uid, condition));
        };

        let slot = self.locate_item(stored, attribute, index, Some(condition))?;
        *slot = Value::Null;
        stored.touch(ts);
        Ok(())
    }

    async fn compact_collection(&self, uid: &str, attribute: &str) -> Result<()> {
        let mut storage = self.write()?;
        let stored = self.locate(&mut storage, uid, None)?;
        if let Some(Value::Array(items)) = stored.data.get_mut(attribute) {
            items.retain(|item| !item.is_null());
        }
        Ok(())
    }
}
