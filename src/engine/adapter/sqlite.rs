//! SQLite Adapter
//!
//! Implements Store for SQLite using rusqlite + r2d2 connection pooling.
//! Each store owns one table of JSON documents keyed by `uuid`. Write
//! conditions are compiled into the `WHERE` clause of the mutating statement
//! so check and write happen in one statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::sql::{attribute_path, quote_ident, SqlCompiler, SqlFilter};
use super::SqlValue;
use crate::engine::error::{Result, StoreError};
use crate::engine::query::token::OffsetToken;
use crate::engine::query::{FindResult, Query, QueryCompiler};
use crate::engine::record::{
    merge_increments, timestamp_value, Increment, Record, WriteCondition, LAST_UPDATE_FIELD,
};
use crate::engine::store::Store;

type DbPool = Pool<SqliteConnectionManager>;
type DbConn = PooledConnection<SqliteConnectionManager>;

const MEMORY_URL: &str = ":memory:";

/// Connection parameters of a SQLite-backed store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqliteParameters {
    /// Database file, directory holding `<database>.db`, or `:memory:`
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Table holding the records
    pub table: String,

    #[serde(default)]
    pub options: SqliteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqliteOptions {
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout(),
            journal_mode: default_journal_mode(),
        }
    }
}

fn default_pool_size() -> u32 {
    10
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_journal_mode() -> String {
    "WAL".to_string()
}

impl SqliteParameters {
    pub fn new(url: &str, table: &str) -> Self {
        Self {
            url: url.to_string(),
            database: None,
            table: table.to_string(),
            options: SqliteOptions::default(),
        }
    }

    pub fn in_memory(table: &str) -> Self {
        Self::new(MEMORY_URL, table)
    }

    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_URL
    }

    /// Resolved database file path
    pub fn path(&self) -> PathBuf {
        let base = PathBuf::from(&self.url);
        match &self.database {
            Some(db) => base.join(format!("{}.db", db)),
            None => base,
        }
    }
}

/// Validate a table name
fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::Config("table name cannot be empty".to_string()));
    }

    if name.starts_with('_') {
        return Err(StoreError::Config(
            "table name cannot start with underscore".to_string(),
        ));
    }

    if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(StoreError::Config(
            "table name must be alphanumeric".to_string(),
        ));
    }

    Ok(())
}

/// Record store backed by one SQLite table.
///
/// The connection pool is opened on first use; concurrent first callers wait
/// on the same initialization instead of each opening a pool.
pub struct SqliteStore {
    name: String,
    parameters: SqliteParameters,
    table: String,
    compiler: SqlCompiler,
    pool: OnceCell<DbPool>,
}

impl SqliteStore {
    pub fn new(name: &str, parameters: SqliteParameters) -> Result<Self> {
        validate_table_name(&parameters.table)?;
        Ok(Self {
            name: name.to_string(),
            table: quote_ident(&parameters.table),
            parameters,
            compiler: SqlCompiler::default(),
            pool: OnceCell::new(),
        })
    }

    pub fn parameters(&self) -> &SqliteParameters {
        &self.parameters
    }

    /// Whether the pool has been opened yet
    pub fn is_connected(&self) -> bool {
        self.pool.initialized()
    }

    async fn pool(&self) -> Result<DbPool> {
        let pool = self
            .pool
            .get_or_try_init(|| async {
                let parameters = self.parameters.clone();
                let table = self.table.clone();
                let opened = tokio::task::spawn_blocking(move || open_pool(&parameters, &table))
                    .await
                    .map_err(StoreError::from)
                    .and_then(|r| r);
                match &opened {
                    Ok(_) => info!(store = %self.name, path = %self.parameters.path().display(), "sqlite store connected"),
                    Err(e) => error!(store = %self.name, error = %e, "failed to open sqlite store"),
                }
                opened
            })
            .await?;
        Ok(pool.clone())
    }

    /// Run `f` on a pooled connection on the blocking thread pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut DbConn) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool().await?;
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| {
                error!(store = %name, error = %e, "sqlite connection unavailable");
                StoreError::from(e)
            })?;
            f(&mut conn)
        })
        .await?
    }

    /// Run a single conditional mutation and map "no row changed" to the
    /// typed failure
    async fn mutate(
        &self,
        uid: &str,
        set: SqlFilter,
        guard: Option<SqlFilter>,
        miss: Miss,
    ) -> Result<()> {
        let table = self.table.clone();
        let name = self.name.clone();
        let uid = uid.to_string();

        self.with_conn(move |conn| {
            let mut sql = format!("UPDATE {} SET data = {} WHERE uuid = ?", table, set.clause);
            let mut params = set.params;
            params.push(SqlValue::Text(uid.clone()));
            if let Some(guard) = guard {
                sql.push_str(" AND ");
                sql.push_str(&guard.clause);
                params.extend(guard.params);
            }

            let changed = conn.execute(&sql, params_from_iter(params.iter()))?;
            if changed > 0 {
                return Ok(());
            }

            let exists = row_exists(conn, &table, &uid)?;
            Err(miss.into_error(&name, &uid, exists))
        })
        .await
    }
}

/// How a mutation that changed no row is reported
enum Miss {
    /// Record-level condition (or none)
    Record(Option<WriteCondition>),
    /// Collection slot, with an optional element-level condition
    Item {
        attribute: String,
        index: usize,
        condition: Option<WriteCondition>,
    },
    /// Append target; the condition only speaks for a missing record
    Append {
        attribute: String,
        condition: Option<WriteCondition>,
    },
    /// Attribute exists but has the wrong type for the operation
    Shape(String),
}

impl Miss {
    fn into_error(self, store: &str, uid: &str, exists: bool) -> StoreError {
        match self {
            Miss::Record(Some(cond)) => {
                warn!(store, uid, field = %cond.field, "update condition failed");
                StoreError::condition_failed(uid, &cond.field, &cond.expected)
            }
            Miss::Record(None) => StoreError::RecordNotFound(uid.to_string()),
            Miss::Item {
                attribute,
                index,
                condition,
            } => match (condition, exists) {
                (Some(cond), _) => {
                    warn!(store, uid, field = %cond.field, attribute = %attribute, index, "item condition failed");
                    StoreError::condition_failed(uid, &cond.field, &cond.expected)
                }
                (None, false) => StoreError::RecordNotFound(uid.to_string()),
                (None, true) => {
                    warn!(store, uid, attribute = %attribute, index, "collection slot not found");
                    StoreError::condition_failed(uid, &format!("{}[{}]", attribute, index), &Value::Null)
                }
            },
            Miss::Append {
                condition: Some(cond),
                ..
            } if !exists => {
                warn!(store, uid, field = %cond.field, "update condition failed");
                StoreError::condition_failed(uid, &cond.field, &cond.expected)
            }
            Miss::Append { attribute, .. } => {
                Miss::Shape(format!("attribute {} is not a collection", attribute))
                    .into_error(store, uid, exists)
            }
            Miss::Shape(_) if !exists => StoreError::RecordNotFound(uid.to_string()),
            Miss::Shape(message) => StoreError::Backend(message),
        }
    }
}

fn open_pool(parameters: &SqliteParameters, table: &str) -> Result<DbPool> {
    let busy_timeout = parameters.options.busy_timeout_ms;
    let (manager, max_size) = if parameters.is_memory() {
        (SqliteConnectionManager::memory(), 1)
    } else {
        let path = parameters.path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        (
            SqliteConnectionManager::file(path),
            parameters.options.pool_size.max(1),
        )
    };

    let manager = manager.with_init(move |conn| {
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout))
    });
    let mut builder = Pool::builder().max_size(max_size);
    if parameters.is_memory() {
        // The database lives and dies with its single connection
        builder = builder.idle_timeout(None).max_lifetime(None);
    }
    let pool = builder.build(manager)?;

    let conn = pool.get()?;
    let _: String = conn.query_row(
        &format!("PRAGMA journal_mode={}", parameters.options.journal_mode),
        [],
        |row| row.get(0),
    )?;
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                uuid TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
            table
        ),
        [],
    )?;

    Ok(pool)
}

fn row_exists(conn: &DbConn, table: &str, uid: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE uuid = ?1", table),
            params![uid],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn read_record(conn: &DbConn, table: &str, uid: &str) -> Result<Option<Record>> {
    let data: Option<String> = conn
        .query_row(
            &format!("SELECT data FROM {} WHERE uuid = ?1", table),
            params![uid],
            |row| row.get(0),
        )
        .optional()?;
    data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
        .transpose()
}

fn write_record(conn: &DbConn, table: &str, record: &Record) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} (uuid, data) VALUES (?1, ?2)
             ON CONFLICT(uuid) DO UPDATE SET data = excluded.data",
            table
        ),
        params![record.uuid, serde_json::to_string(record)?],
    )?;
    Ok(())
}

/// `'$."_lastUpdate"', json(?)` argument pair for `json_set`
fn last_update_args(ts: DateTime<Utc>) -> Result<(String, Vec<SqlValue>)> {
    Ok((
        "?, json(?)".to_string(),
        vec![
            SqlValue::Text(attribute_path(LAST_UPDATE_FIELD)?),
            SqlValue::json_text(&timestamp_value(ts)),
        ],
    ))
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, uid: &str) -> Result<bool> {
        let table = self.table.clone();
        let uid = uid.to_string();
        self.with_conn(move |conn| row_exists(conn, &table, &uid))
            .await
    }

    async fn get(&self, uid: &str) -> Result<Option<Record>> {
        let table = self.table.clone();
        let uid = uid.to_string();
        self.with_conn(move |conn| read_record(conn, &table, &uid))
            .await
    }

    async fn get_all(&self, uids: Option<&[String]>) -> Result<Vec<Record>> {
        let table = self.table.clone();
        let uids = uids.map(<[String]>::to_vec);
        self.with_conn(move |conn| match uids {
            Some(uids) => {
                let mut records = Vec::with_capacity(uids.len());
                for uid in uids {
                    if let Some(record) = read_record(conn, &table, &uid)? {
                        records.push(record);
                    }
                }
                Ok(records)
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("SELECT data FROM {} ORDER BY uuid", table))?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut records = Vec::new();
                for data in rows {
                    records.push(serde_json::from_str(&data?)?);
                }
                Ok(records)
            }
        })
        .await
    }

    async fn find(&self, query: &Query) -> Result<FindResult> {
        let filter = match &query.filter {
            Some(expr) => self.compiler.compile(expr)?,
            None => SqlFilter::always(),
        };
        let order = self.compiler.order_by(&query.order_by)?;
        let offset = OffsetToken::start(query.continuation_token.as_deref())?;
        let limit = query.page_limit()?;
        let sql_offset = i64::try_from(offset).map_err(|_| {
            StoreError::InvalidContinuationToken(format!("offset {} out of range", offset))
        })?;
        // Fetch one extra row to learn whether another page exists; -1 is no limit
        let fetch = limit
            .and_then(|l| i64::try_from(l).ok())
            .and_then(|l| l.checked_add(1))
            .unwrap_or(-1);

        let sql = format!(
            "SELECT data FROM {} WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
            self.table, filter.clause, order.clause
        );
        debug!(store = %self.name, %sql, offset, "sqlite find");

        let mut params = filter.params;
        params.extend(order.params);
        params.push(SqlValue::Integer(fetch));
        params.push(SqlValue::Integer(sql_offset));

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                row.get::<_, String>(0)
            })?;
            let mut results: Vec<Record> = Vec::new();
            for data in rows {
                results.push(serde_json::from_str(&data?)?);
            }

            let continuation_token = match limit {
                Some(l) if results.len() > l => {
                    results.truncate(l);
                    Some(OffsetToken::new(offset.saturating_add(l)).encode())
                }
                _ => None,
            };

            Ok(FindResult {
                results,
                continuation_token,
            })
        })
        .await
    }

    async fn save(&self, record: Record) -> Result<Record> {
        let record = record.stamped();
        let table = self.table.clone();
        let stored = record.clone();
        self.with_conn(move |conn| write_record(conn, &table, &stored))
            .await?;
        Ok(record)
    }

    async fn update(&self, record: Record, condition: Option<&WriteCondition>) -> Result<Record> {
        let record = record.stamped();
        let set = SqlFilter::new("?", vec![SqlValue::Text(serde_json::to_string(&record)?)]);
        let guard = condition.map(|c| self.compiler.condition(c)).transpose()?;
        self.mutate(&record.uuid, set, guard, Miss::Record(condition.cloned()))
            .await?;
        Ok(record)
    }

    async fn patch(&self, partial: Record, condition: Option<&WriteCondition>) -> Result<()> {
        let partial = partial.stamped();
        let mut args = Vec::with_capacity(partial.data.len() + 1);
        let mut params = Vec::new();
        for (key, value) in &partial.data {
            args.push("?, json(?)".to_string());
            params.push(SqlValue::Text(attribute_path(key)?));
            params.push(SqlValue::json_text(value));
        }
        if let Some(ts) = partial.last_update {
            let (arg, ts_params) = last_update_args(ts)?;
            args.push(arg);
            params.extend(ts_params);
        }

        let set = SqlFilter::new(format!("json_set(data, {})", args.join(", ")), params);
        let guard = condition.map(|c| self.compiler.condition(c)).transpose()?;
        self.mutate(&partial.uuid, set, guard, Miss::Record(condition.cloned()))
            .await
    }

    async fn delete(&self, uid: &str, condition: Option<&WriteCondition>) -> Result<()> {
        let table = self.table.clone();
        let name = self.name.clone();
        let uid = uid.to_string();
        let condition = condition.cloned();
        let guard = condition
            .as_ref()
            .map(|c| self.compiler.condition(c))
            .transpose()?;

        self.with_conn(move |conn| {
            let mut sql = format!("DELETE FROM {} WHERE uuid = ?", table);
            let mut params = vec![SqlValue::Text(uid.clone())];
            if let Some(guard) = guard {
                sql.push_str(" AND ");
                sql.push_str(&guard.clause);
                params.extend(guard.params);
            }

            let changed = conn.execute(&sql, params_from_iter(params.iter()))?;
            match condition {
                Some(cond) if changed == 0 => {
                    Err(Miss::Record(Some(cond)).into_error(&name, &uid, false))
                }
                _ => Ok(()),
            }
        })
        .await
    }

    async fn remove_attribute(
        &self,
        uid: &str,
        attribute: &str,
        condition: Option<&WriteCondition>,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let (ts_arg, ts_params) = last_update_args(ts)?;
        let mut params = vec![SqlValue::Text(attribute_path(attribute)?)];
        params.extend(ts_params);
        let set = SqlFilter::new(format!("json_set(json_remove(data, ?), {})", ts_arg), params);
        let guard = condition.map(|c| self.compiler.condition(c)).transpose()?;
        self.mutate(uid, set, guard, Miss::Record(condition.cloned()))
            .await
    }

    async fn increment_attributes(
        &self,
        uid: &str,
        increments: &[Increment],
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let mut args = Vec::new();
        let mut params = Vec::new();
        let mut guards = Vec::new();
        let mut guard_params = Vec::new();

        for inc in merge_increments(increments) {
            let path = attribute_path(&inc.property)?;
            args.push("?, COALESCE(json_extract(data, ?), 0) + ?".to_string());
            params.push(SqlValue::Text(path.clone()));
            params.push(SqlValue::Text(path.clone()));
            params.push(SqlValue::from_json(&Value::Number(inc.value)));

            guards.push("COALESCE(json_type(data, ?), 'null') IN ('integer', 'real', 'null')");
            guard_params.push(SqlValue::Text(path));
        }
        let (ts_arg, ts_params) = last_update_args(ts)?;
        args.push(ts_arg);
        params.extend(ts_params);

        let set = SqlFilter::new(format!("json_set(data, {})", args.join(", ")), params);
        let guard = (!guards.is_empty()).then(|| SqlFilter::new(guards.join(" AND "), guard_params));
        self.mutate(
            uid,
            set,
            guard,
            Miss::Shape(format!("non-numeric attribute in increment of {}", uid)),
        )
        .await
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
        let collection = attribute_path(attribute)?;
        let (ts_arg, ts_params) = last_update_args(ts)?;

        match index {
            None => {
                let mut params = vec![
                    SqlValue::Text(collection.clone()),
                    SqlValue::Text(collection.clone()),
                    SqlValue::json_text(&item),
                ];
                params.extend(ts_params);
                let set = SqlFilter::new(
                    format!(
                        "json_set(data, ?, json(json_insert(COALESCE(json_extract(data, ?), '[]'), '$[#]', json(?))), {})",
                        ts_arg
                    ),
                    params,
                );
                let guard = SqlFilter::new(
                    "COALESCE(json_type(data, ?), 'null') IN ('array', 'null')",
                    vec![SqlValue::Text(collection)],
                );
                let miss = Miss::Append {
                    attribute: attribute.to_string(),
                    condition: condition.cloned(),
                };
                self.mutate(uid, set, Some(guard), miss).await
            }
            Some(index) => {
                let mut params = vec![
                    SqlValue::Text(format!("{}[{}]", collection, index)),
                    SqlValue::json_text(&item),
                ];
                params.extend(ts_params);
                let set = SqlFilter::new(format!("json_set(data, ?, json(?), {})", ts_arg), params);
                let guard = self.compiler.item_condition(attribute, index, condition)?;
                let miss = Miss::Item {
                    attribute: attribute.to_string(),
                    index,
                    condition: condition.cloned(),
                };
                self.mutate(uid, set, Some(guard), miss).await
            }
        }
    }

    async fn clear_collection_item(
        &self,
        uid: &str,
        attribute: &str,
        index: usize,
        condition: &WriteCondition,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let collection = attribute_path(attribute)?;
        let (ts_arg, ts_params) = last_update_args(ts)?;
        let mut params = vec![SqlValue::Text(format!("{}[{}]", collection, index))];
        params.extend(ts_params);

        let set = SqlFilter::new(format!("json_set(data, ?, json('null'), {})", ts_arg), params);
        let guard = self
            .compiler
            .item_condition(attribute, index, Some(condition))?;
        let miss = Miss::Item {
            attribute: attribute.to_string(),
            index,
            condition: Some(condition.clone()),
        };
        self.mutate(uid, set, Some(guard), miss).await
    }

    async fn compact_collection(&self, uid: &str, attribute: &str) -> Result<()> {
        let table = self.table.clone();
        let uid = uid.to_string();
        let attribute = attribute.to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let data: Option<String> = tx
                .query_row(
                    &format!("SELECT data FROM {} WHERE uuid = ?1", table),
                    params![uid],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(data) = data else {
                return Err(StoreError::RecordNotFound(uid));
            };

            let mut record: Record = serde_json::from_str(&data)?;
            if let Some(Value::Array(items)) = record.data.get_mut(&attribute) {
                let before = items.len();
                items.retain(|item| !item.is_null());
                if items.len() != before {
                    tx.execute(
                        &format!("UPDATE {} SET data = ?1 WHERE uuid = ?2", table),
                        params![serde_json::to_string(&record)?, uid],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
