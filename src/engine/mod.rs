// AirStore Engine - Core module structure
pub mod adapter;
pub mod cli;
pub mod config;
pub mod error;
pub mod migration;
pub mod query;
pub mod record;
pub mod registry;
pub mod store;

pub use config::Config;
pub use error::{Result, StoreError};
pub use migration::MigrationStore;
pub use store::Store;
