//! AirStore Configuration Module
//! Handles loading and validating airstore.config.json

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::adapter::SqliteParameters;
use super::migration::DEFAULT_PAGE_SIZE;

pub const CONFIG_FILE: &str = "airstore.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub stores: BTreeMap<String, StoreConfig>,
}

/// One named store, tagged by backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    Memory,
    Sqlite(SqliteParameters),
    Migration(MigrationConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationConfig {
    /// Name of the current authoritative store
    pub from: String,
    /// Name of the store being migrated to
    pub to: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Config {
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// A single SQLite store under `<project_dir>/data`
    pub fn default_for_project(project_dir: &Path) -> Self {
        let mut parameters =
            SqliteParameters::new(&project_dir.join("data").display().to_string(), "records");
        parameters.database = Some("airstore".to_string());

        let mut stores = BTreeMap::new();
        stores.insert("records".to_string(), StoreConfig::Sqlite(parameters));
        Self {
            version: "0.1.0".to_string(),
            stores,
        }
    }
}
