//! Dual-write migration between two stores
//!
//! `MigrationStore` is a [`Store`] facade over a `from` store (authoritative
//! during migration) and a `to` store (the replica being built). Reads go to
//! `from`. Every mutation runs on both sides concurrently; which side's
//! outcome reaches the caller is decided by [`MutationKind::authority`].
//! [`MigrationStore::migrate`] backfills records that predate the facade.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::Result;
use super::query::{FindResult, Query};
use super::record::{Increment, Record, WriteCondition};
use super::store::Store;

/// Default number of records fetched per backfill page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Mutating primitives of the store contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Save,
    Update,
    Patch,
    Delete,
    RemoveAttribute,
    Increment,
    UpsertItem,
    ClearItem,
    CompactCollection,
    DeleteItem,
}

/// Side whose outcome is returned to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    From,
    To,
}

impl MutationKind {
    /// Deletes are decided by `to` so that a record removed during migration
    /// can never survive on the replica. Everything else is decided by `from`.
    pub fn authority(self) -> Authority {
        match self {
            MutationKind::Delete => Authority::To,
            _ => Authority::From,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Save => "save",
            MutationKind::Update => "update",
            MutationKind::Patch => "patch",
            MutationKind::Delete => "delete",
            MutationKind::RemoveAttribute => "remove_attribute",
            MutationKind::Increment => "increment_attributes",
            MutationKind::UpsertItem => "upsert_item_to_collection",
            MutationKind::ClearItem => "clear_collection_item",
            MutationKind::CompactCollection => "compact_collection",
            MutationKind::DeleteItem => "delete_item_from_collection",
        }
    }
}

/// Outcomes of one mutation on both sides
pub struct DualResult<T> {
    pub from: Result<T>,
    pub to: Result<T>,
}

impl<T> DualResult<T> {
    /// Return the authoritative outcome; the other side's error is logged
    /// and dropped
    pub fn resolve(self, kind: MutationKind, uid: &str) -> Result<T> {
        let (kept, dropped, side) = match kind.authority() {
            Authority::From => (self.from, self.to, "to"),
            Authority::To => (self.to, self.from, "from"),
        };

        if let Err(e) = dropped {
            warn!(
                operation = kind.as_str(),
                uid,
                side,
                error = %e,
                "migration fan-out failed on non-authoritative side"
            );
        }
        kept
    }
}

/// Outcome of a backfill pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Records read from `from`
    pub scanned: usize,
    /// Records written to `to`
    pub copied: usize,
}

pub struct MigrationStore {
    name: String,
    from: Arc<dyn Store>,
    to: Arc<dyn Store>,
    page_size: usize,
}

impl MigrationStore {
    pub fn new(name: &str, from: Arc<dyn Store>, to: Arc<dyn Store>) -> Self {
        Self {
            name: name.to_string(),
            from,
            to,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn from(&self) -> &Arc<dyn Store> {
        &self.from
    }

    pub fn to(&self) -> &Arc<dyn Store> {
        &self.to
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Copy every record of `from` that `to` does not have yet.
    ///
    /// Records already present in `to` are left alone, so running the pass
    /// again is cheap and never overwrites fresher dual-written data.
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        let mut token: Option<String> = None;
        let mut page = 0usize;

        info!(
            store = %self.name,
            from = self.from.name(),
            to = self.to.name(),
            page_size = self.page_size,
            "starting backfill"
        );

        loop {
            let query = Query::new().limit(self.page_size).continuation(token.take());
            let FindResult {
                results,
                continuation_token,
            } = self.from.find(&query).await?;

            let present = join_all(results.iter().map(|r| self.to.exists(&r.uuid))).await;

            let mut copied = 0;
            for (record, exists) in results.iter().zip(present) {
                if !exists? {
                    self.to.save(record.clone()).await?;
                    copied += 1;
                }
            }

            page += 1;
            report.scanned += results.len();
            report.copied += copied;
            info!(
                store = %self.name,
                page,
                scanned = report.scanned,
                copied = report.copied,
                "backfill page done"
            );

            match continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        info!(store = %self.name, scanned = report.scanned, copied = report.copied, "backfill complete");
        Ok(report)
    }
}

#[async_trait]
impl Store for MigrationStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, uid: &str) -> Result<bool> {
        self.from.exists(uid).await
    }

    async fn get(&self, uid: &str) -> Result<Option<Record>> {
        self.from.get(uid).await
    }

    async fn get_all(&self, uids: Option<&[String]>) -> Result<Vec<Record>> {
        self.from.get_all(uids).await
    }

    async fn find(&self, query: &Query) -> Result<FindResult> {
        self.from.find(query).await
    }

    async fn save(&self, record: Record) -> Result<Record> {
        let record = record.stamped();
        let (from, to) = tokio::join!(self.from.save(record.clone()), self.to.save(record.clone()));
        DualResult { from, to }.resolve(MutationKind::Save, &record.uuid)
    }

    async fn update(&self, record: Record, condition: Option<&WriteCondition>) -> Result<Record> {
        let record = record.stamped();
        let (from, to) = tokio::join!(
            self.from.update(record.clone(), condition),
            self.to.update(record.clone(), condition)
        );
        DualResult { from, to }.resolve(MutationKind::Update, &record.uuid)
    }

    async fn patch(&self, partial: Record, condition: Option<&WriteCondition>) -> Result<()> {
        let partial = partial.stamped();
        let (from, to) = tokio::join!(
            self.from.patch(partial.clone(), condition),
            self.to.patch(partial.clone(), condition)
        );
        DualResult { from, to }.resolve(MutationKind::Patch, &partial.uuid)
    }

    async fn delete(&self, uid: &str, condition: Option<&WriteCondition>) -> Result<()> {
        let (from, to) = tokio::join!(
            self.from.delete(uid, condition),
            self.to.delete(uid, condition)
        );
        DualResult { from, to }.resolve(MutationKind::Delete, uid)
    }

    async fn remove_attribute(
        &self,
        uid: &str,
        attribute: &str,
        condition: Option<&WriteCondition>,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let (from, to) = tokio::join!(
            self.from.remove_attribute(uid, attribute, condition, ts),
            self.to.remove_attribute(uid, attribute, condition, ts)
        );
        DualResult { from, to }.resolve(MutationKind::RemoveAttribute, uid)
    }

    async fn increment_attributes(
        &self,
        uid: &str,
        increments: &[Increment],
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let (from, to) = tokio::join!(
            self.from.increment_attributes(uid, increments, ts),
            self.to.increment_attributes(uid, increments, ts)
        );
        DualResult { from, to }.resolve(MutationKind::Increment, uid)
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
        let (from, to) = tokio::join!(
            self.from
                .upsert_item_to_collection(uid, attribute, item.clone(), index, condition, ts),
            self.to
                .upsert_item_to_collection(uid, attribute, item, index, condition, ts)
        );
        DualResult { from, to }.resolve(MutationKind::UpsertItem, uid)
    }

    async fn clear_collection_item(
        &self,
        uid: &str,
        attribute: &str,
        index: usize,
        condition: &WriteCondition,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let (from, to) = tokio::join!(
            self.from
                .clear_collection_item(uid, attribute, index, condition, ts),
            self.to
                .clear_collection_item(uid, attribute, index, condition, ts)
        );
        DualResult { from, to }.resolve(MutationKind::ClearItem, uid)
    }

    async fn compact_collection(&self, uid: &str, attribute: &str) -> Result<()> {
        let (from, to) = tokio::join!(
            self.from.compact_collection(uid, attribute),
            self.to.compact_collection(uid, attribute)
        );
        DualResult { from, to }.resolve(MutationKind::CompactCollection, uid)
    }

    /// Each side runs its own two-phase removal, so a failed condition on `to`
    /// never compacts the `to` collection
    async fn delete_item_from_collection(
        &self,
        uid: &str,
        attribute: &str,
        index: usize,
        condition: &WriteCondition,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let (from, to) = tokio::join!(
            self.from
                .delete_item_from_collection(uid, attribute, index, condition, ts),
            self.to
                .delete_item_from_collection(uid, attribute, index, condition, ts)
        );
        DualResult { from, to }.resolve(MutationKind::DeleteItem, uid)
    }
}
