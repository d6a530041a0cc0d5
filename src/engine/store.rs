//! Store contract
//!
//! Every backend implements the same small set of primitives. Mutations carry
//! an optional [`WriteCondition`]; when present, the comparison and the write
//! are one atomic backend operation.
//!
//! | Operation | Failure |
//! |-----------|---------|
//! | [`get_required`](Store::get_required) | `RecordNotFound` |
//! | [`update`](Store::update), [`patch`](Store::patch), [`remove_attribute`](Store::remove_attribute) | `UpdateConditionFailed` / `RecordNotFound` |
//! | [`delete`](Store::delete) | `UpdateConditionFailed` (unconditioned deletes of missing records are no-ops) |
//! | [`increment_attributes`](Store::increment_attributes) | `RecordNotFound` |
//! | [`upsert_item_to_collection`](Store::upsert_item_to_collection) | `UpdateConditionFailed` / `RecordNotFound` |
//! | [`delete_item_from_collection`](Store::delete_item_from_collection) | `UpdateConditionFailed` if the element condition fails |
//!
//! Backend failures are returned unchanged; nothing in this layer retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::error::{Result, StoreError};
use super::query::{FindResult, Query};
use super::record::{Increment, Record, WriteCondition};

#[async_trait]
pub trait Store: Send + Sync {
    /// Name this store was registered under
    fn name(&self) -> &str;

    /// Check whether a record exists
    async fn exists(&self, uid: &str) -> Result<bool> {
        Ok(self.get(uid).await?.is_some())
    }

    /// Fetch a record, `None` when absent
    async fn get(&self, uid: &str) -> Result<Option<Record>>;

    /// Fetch a record, failing with `RecordNotFound` when absent
    async fn get_required(&self, uid: &str) -> Result<Record> {
        self.get(uid)
            .await?
            .ok_or_else(|| StoreError::RecordNotFound(uid.to_string()))
    }

    /// Fetch the listed records (missing ids are skipped), or every record
    async fn get_all(&self, uids: Option<&[String]>) -> Result<Vec<Record>>;

    /// Run a paginated query
    async fn find(&self, query: &Query) -> Result<FindResult>;

    /// Insert or overwrite a record under its `uuid`
    async fn save(&self, record: Record) -> Result<Record>;

    /// Replace an existing record
    ///
    /// A `_lastUpdate` already carried by `record` is written as is. A caller
    /// doing read-modify-write under `WriteCondition::last_update` must set a
    /// fresh timestamp (`Record::with_last_update` or `touch`), otherwise the
    /// stored value never advances and a second writer holding the old
    /// timestamp still passes the condition.
    async fn update(&self, record: Record, condition: Option<&WriteCondition>) -> Result<Record>;

    /// Shallow-merge the attributes of `partial` into the stored record
    ///
    /// The same `_lastUpdate` rule as [`Store::update`] applies: supply a
    /// fresh timestamp when the write is conditioned on it.
    async fn patch(&self, partial: Record, condition: Option<&WriteCondition>) -> Result<()>;

    async fn delete(&self, uid: &str, condition: Option<&WriteCondition>) -> Result<()>;

    /// Remove one top-level attribute
    async fn remove_attribute(
        &self,
        uid: &str,
        attribute: &str,
        condition: Option<&WriteCondition>,
        ts: DateTime<Utc>,
    ) -> Result<()>;

    /// Apply every delta as one atomic batch; absent attributes count as 0
    async fn increment_attributes(
        &self,
        uid: &str,
        increments: &[Increment],
        ts: DateTime<Utc>,
    ) -> Result<()>;

    /// Append `item` when `index` is `None`, otherwise replace the element at
    /// `index`. The condition is checked against the addressed element.
    async fn upsert_item_to_collection(
        &self,
        uid: &str,
        attribute: &str,
        item: Value,
        index: Option<usize>,
        condition: Option<&WriteCondition>,
        ts: DateTime<Utc>,
    ) -> Result<()>;

    /// Set the element at `index` to null if its own condition holds
    async fn clear_collection_item(
        &self,
        uid: &str,
        attribute: &str,
        index: usize,
        condition: &WriteCondition,
        ts: DateTime<Utc>,
    ) -> Result<()>;

    /// Drop every null slot from a collection attribute. Safe to retry.
    async fn compact_collection(&self, uid: &str, attribute: &str) -> Result<()>;

    /// Two-phase element removal: conditional null-out, then compaction.
    ///
    /// A writer that stores a null element in the same collection between the
    /// two phases will see it removed by the compaction.
    async fn delete_item_from_collection(
        &self,
        uid: &str,
        attribute: &str,
        index: usize,
        condition: &WriteCondition,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        self.clear_collection_item(uid, attribute, index, condition, ts)
            .await?;
        self.compact_collection(uid, attribute).await
    }
}
