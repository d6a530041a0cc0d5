#![allow(dead_code)]

use airstore::engine::error::{Result, StoreError};
use airstore::{
    FindResult, Increment, MemoryStore, MutationKind, Query, Record, SqliteParameters,
    SqliteStore, Store, WriteCondition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Save records with uuids `"1"..="n"`
pub async fn seed(store: &dyn Store, range: std::ops::RangeInclusive<usize>) -> Result<()> {
    for i in range {
        store
            .save(Record::new(i.to_string()).with("index", i as i64))
            .await?;
    }
    Ok(())
}

/// A SQLite store in a fresh temporary directory. Keep the `TempDir` alive
/// for as long as the store is used.
pub fn sqlite_store(name: &str) -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut parameters = SqliteParameters::new(&dir.path().display().to_string(), "records");
    parameters.database = Some(name.to_string());
    let store = SqliteStore::new(name, parameters).expect("sqlite store");
    (dir, store)
}

pub fn memory_store(name: &str) -> MemoryStore {
    MemoryStore::new(name)
}

/// Wraps a store and fails the selected mutations with a backend error
pub struct FaultyStore {
    inner: Arc<dyn Store>,
    failing: Mutex<HashSet<&'static str>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, kind: MutationKind) {
        self.failing.lock().unwrap().insert(kind.as_str());
    }

    fn check(&self, kind: MutationKind) -> Result<()> {
        if self.failing.lock().unwrap().contains(kind.as_str()) {
            return Err(StoreError::Backend(format!("injected {} failure", kind.as_str())));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FaultyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, uid: &str) -> Result<Option<Record>> {
        self.inner.get(uid).await
    }

    async fn get_all(&self, uids: Option<&[String]>) -> Result<Vec<Record>> {
        self.inner.get_all(uids).await
    }

    async fn find(&self, query: &Query) -> Result<FindResult> {
        self.inner.find(query).await
    }

    async fn save(&self, record: Record) -> Result<Record> {
        self.check(MutationKind::Save)?;
        self.inner.save(record).await
    }

    async fn update(&self, record: Record, condition: Option<&WriteCondition>) -> Result<Record> {
        self.check(MutationKind::Update)?;
        self.inner.update(record, condition).await
    }

    async fn patch(&self, partial: Record, condition: Option<&WriteCondition>) -> Result<()> {
        self.check(MutationKind::Patch)?;
        self.inner.patch(partial, condition).await
    }

    async fn delete(&self, uid: &str, condition: Option<&WriteCondition>) -> Result<()> {
        self.check(MutationKind::Delete)?;
        self.inner.delete(uid, condition).await
    }

    async fn remove_attribute(
        &self,
        uid: &str,
        attribute: &str,
        condition: Option<&WriteCondition>,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        self.check(MutationKind::RemoveAttribute)?;
        self.inner.remove_attribute(uid, attribute, condition, ts).await
    }

    async fn increment_attributes(
        &self,
        uid: &str,
        increments: &[Increment],
        ts: DateTime<Utc>,
    ) -> Result<()> {
        self.check(MutationKind::Increment)?;
        self.inner.increment_attributes(uid, increments, ts).await
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
        self.check(MutationKind::UpsertItem)?;
        self.inner
            .upsert_item_to_collection(uid, attribute, item, index, condition, ts)
            .await
    }

    async fn clear_collection_item(
        &self,
        uid: &str,
        attribute: &str,
        index: usize,
        condition: &WriteCondition,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        self.check(MutationKind::ClearItem)?;
        self.inner
            .clear_collection_item(uid, attribute, index, condition, ts)
            .await
    }

    async fn compact_collection(&self, uid: &str, attribute: &str) -> Result<()> {
        self.check(MutationKind::CompactCollection)?;
        self.inner.compact_collection(uid, attribute).await
    }
}
