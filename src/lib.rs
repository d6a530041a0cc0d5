//! AirStore - backend-agnostic record storage
//!
//! A single [`Store`] contract over schema-less records, a backend-neutral
//! query tree, optimistic concurrency through write conditions, and a
//! dual-write [`MigrationStore`] for moving data between backends.

pub mod engine;

pub use engine::adapter::{MemoryStore, SqliteParameters, SqliteStore};
pub use engine::config::{Config, StoreConfig};
pub use engine::error::{Result, StoreError};
pub use engine::migration::{MigrationReport, MigrationStore, MutationKind};
pub use engine::query::{
    Comparison, ComparisonOperator, Expression, FindResult, OrderBy, Query, QueryCompiler,
    SortDirection,
};
pub use engine::record::{Increment, Record, WriteCondition};
pub use engine::registry::StoreRegistry;
pub use engine::store::Store;
