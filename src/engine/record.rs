//! Record representation for schema-less storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the identifier field as stored by every backend
pub const UUID_FIELD: &str = "uuid";

/// Name of the last modification timestamp field
pub const LAST_UPDATE_FIELD: &str = "_lastUpdate";

/// A stored record: an open map of named values plus its identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier, allocated by the caller
    pub uuid: String,

    /// Last modification timestamp, supplied by the writer
    #[serde(
        rename = "_lastUpdate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_update: Option<DateTime<Utc>>,

    /// The record attributes
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            last_update: None,
            data: Map::new(),
        }
    }

    /// Build a record from a JSON object, which must carry a string `uuid`
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Builder-style attribute setter
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_last_update(mut self, ts: DateTime<Utc>) -> Self {
        self.last_update = Some(ts);
        self
    }

    /// Get an attribute
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Set an attribute
    pub fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    /// Remove an attribute, returning its previous value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Fill `_lastUpdate` with the current time when the writer left it empty.
    /// A timestamp read back from the store is kept; call `touch` before
    /// writing a fetched record that others may condition on.
    pub fn stamped(mut self) -> Self {
        if self.last_update.is_none() {
            self.last_update = Some(Utc::now());
        }
        self
    }

    pub fn touch(&mut self, ts: DateTime<Utc>) {
        self.last_update = Some(ts);
    }

    /// Resolve a top-level field, including the reserved ones, as a JSON value
    pub fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            UUID_FIELD => Some(Value::String(self.uuid.clone())),
            LAST_UPDATE_FIELD => self.last_update.map(timestamp_value),
            _ => self.data.get(field).cloned(),
        }
    }

    /// Full JSON form, as persisted
    pub fn to_value(&self) -> Value {
        let mut map = self.data.clone();
        map.insert(UUID_FIELD.to_string(), Value::String(self.uuid.clone()));
        if let Some(ts) = self.last_update {
            map.insert(LAST_UPDATE_FIELD.to_string(), timestamp_value(ts));
        }
        Value::Object(map)
    }
}

/// JSON encoding of a timestamp, identical to the serde form of `_lastUpdate`
pub fn timestamp_value(ts: DateTime<Utc>) -> Value {
    serde_json::to_value(ts).unwrap_or(Value::Null)
}

/// Optimistic concurrency precondition attached to a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteCondition {
    /// Field whose stored value is compared
    pub field: String,
    /// Value the field must hold for the write to apply
    pub expected: Value,
}

impl WriteCondition {
    pub fn new(field: &str, expected: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            expected: expected.into(),
        }
    }

    /// Condition on the record's `_lastUpdate`, the default condition field
    pub fn last_update(ts: DateTime<Utc>) -> Self {
        Self {
            field: LAST_UPDATE_FIELD.to_string(),
            expected: timestamp_value(ts),
        }
    }

    /// Check the condition against a resolved field value
    pub fn holds(&self, actual: Option<&Value>) -> bool {
        match actual {
            Some(actual) => values_equal(actual, &self.expected),
            None => self.expected.is_null(),
        }
    }
}

/// A single delta applied by `increment_attributes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Increment {
    pub property: String,
    pub value: serde_json::Number,
}

impl Increment {
    pub fn new(property: &str, value: impl Into<serde_json::Number>) -> Self {
        Self {
            property: property.to_string(),
            value: value.into(),
        }
    }
}

/// Sum deltas that target the same property, keeping first-seen order
pub fn merge_increments(increments: &[Increment]) -> Vec<Increment> {
    let mut merged: Vec<Increment> = Vec::with_capacity(increments.len());
    for inc in increments {
        match merged.iter_mut().find(|m| m.property == inc.property) {
            Some(existing) => {
                existing.value = add_numbers(&existing.value, &inc.value)
                    .unwrap_or_else(|| existing.value.clone());
            }
            None => merged.push(inc.clone()),
        }
    }
    merged
}

/// Add two JSON numbers, staying integral when both sides are
pub(crate) fn add_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Option<serde_json::Number> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Some(sum.into());
        }
    }
    serde_json::Number::from_f64(a.as_f64()? + b.as_f64()?)
}

/// Equality that treats `1` and `1.0` as the same number, as SQL backends do
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => a == b,
    }
}
