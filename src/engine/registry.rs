//! Store Registry
//!
//! Resolves the stores named in [`Config`] into shared [`Store`] handles.
//! Migration stores reference other entries by name; those are built first
//! and shared, so a store wrapped by a migration is the same instance the
//! registry hands out under its own name.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::adapter::{MemoryStore, SqliteStore};
use super::config::{Config, StoreConfig};
use super::error::{Result, StoreError};
use super::migration::MigrationStore;
use super::store::Store;

#[derive(Default)]
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn Store>>,
    migrations: HashMap<String, Arc<MigrationStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for name in config.stores.keys() {
            registry.build(config, name, &mut HashSet::new())?;
        }
        Ok(registry)
    }

    /// Register an already constructed store
    pub fn register(&mut self, store: Arc<dyn Store>) {
        self.stores.insert(store.name().to_string(), store);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Store>> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::Config(format!("unknown store: {}", name)))
    }

    /// Migration store by name, for operator actions such as backfill
    pub fn migration(&self, name: &str) -> Result<Arc<MigrationStore>> {
        self.migrations
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::Config(format!("{} is not a migration store", name)))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn build(
        &mut self,
        config: &Config,
        name: &str,
        visiting: &mut HashSet<String>,
    ) -> Result<Arc<dyn Store>> {
        if let Some(store) = self.stores.get(name) {
            return Ok(store.clone());
        }
        if !visiting.insert(name.to_string()) {
            return Err(StoreError::Config(format!(
                "store {} references itself through a migration",
                name
            )));
        }

        let entry = config
            .stores
            .get(name)
            .ok_or_else(|| StoreError::Config(format!("unknown store: {}", name)))?;

        let store: Arc<dyn Store> = match entry {
            StoreConfig::Memory => Arc::new(MemoryStore::new(name)),
            StoreConfig::Sqlite(parameters) => {
                Arc::new(SqliteStore::new(name, parameters.clone())?)
            }
            StoreConfig::Migration(migration) => {
                let from = self.build(config, &migration.from, visiting)?;
                let to = self.build(config, &migration.to, visiting)?;
                let store = Arc::new(
                    MigrationStore::new(name, from, to).with_page_size(migration.page_size),
                );
                self.migrations.insert(name.to_string(), store.clone());
                store
            }
        };

        debug!(store = name, "store registered");
        visiting.remove(name);
        self.stores.insert(name.to_string(), store.clone());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::MigrationConfig;
    use crate::engine::record::Record;

    fn config(entries: Vec<(&str, StoreConfig)>) -> Config {
        Config {
            version: "0.1.0".to_string(),
            stores: entries
                .into_iter()
                .map(|(n, c)| (n.to_string(), c))
                .collect(),
        }
    }

    fn migration(from: &str, to: &str) -> StoreConfig {
        StoreConfig::Migration(MigrationConfig {
            from: from.to_string(),
            to: to.to_string(),
            page_size: 10,
        })
    }

    #[tokio::test]
    async fn test_migration_shares_wrapped_stores() {
        let registry = StoreRegistry::from_config(&config(vec![
            ("a", StoreConfig::Memory),
            ("b", StoreConfig::Memory),
            ("ab", migration("a", "b")),
        ]))
        .unwrap();

        registry
            .get("ab")
            .unwrap()
            .save(Record::new("r1"))
            .await
            .unwrap();
        assert!(registry.get("a").unwrap().exists("r1").await.unwrap());
        assert!(registry.get("b").unwrap().exists("r1").await.unwrap());
        assert_eq!(registry.migration("ab").unwrap().page_size(), 10);
        assert!(registry.migration("a").is_err());
        assert_eq!(registry.names(), vec!["a", "ab", "b"]);
    }

    #[test]
    fn test_unknown_reference() {
        let result = StoreRegistry::from_config(&config(vec![
            ("a", StoreConfig::Memory),
            ("ab", migration("a", "missing")),
        ]));
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_cycle_detected() {
        let result = StoreRegistry::from_config(&config(vec![
            ("x", migration("y", "z")),
            ("y", migration("x", "z")),
            ("z", StoreConfig::Memory),
        ]));
        assert!(matches!(result, Err(StoreError::Config(_))));
    }
}
