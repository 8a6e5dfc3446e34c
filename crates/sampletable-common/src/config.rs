//! Configuration types for SampleTable
//!
//! Loaded from TOML; every field has a default so an empty file (or no file)
//! yields a working configuration.

use crate::error::{Error, Result};
use crate::schema::{ColumnSpec, ColumnType, StorageMode, TableSchema};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Tables created at service startup
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.service.request_queue_depth == 0 {
            return Err(Error::Configuration(
                "service.request_queue_depth must be positive".into(),
            ));
        }
        if self.service.max_concurrent_backend_ops == 0 || self.client.max_concurrent_blob_ops == 0 {
            return Err(Error::Configuration("concurrency limits must be positive".into()));
        }
        for table in &self.tables {
            table.schema()?;
        }
        Ok(())
    }
}

/// Table service settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Capacity of each table's request channel
    #[serde(default = "default_queue_depth")]
    pub request_queue_depth: usize,
    /// Blob store operations in flight per call
    #[serde(default = "default_concurrency")]
    pub max_concurrent_backend_ops: usize,
    /// Directory for durable row metadata; in-memory only when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Delete the superseded blob object when a by-reference cell is overwritten
    #[serde(default = "default_true")]
    pub reclaim_overwritten_objects: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_queue_depth: default_queue_depth(),
            max_concurrent_backend_ops: default_concurrency(),
            data_dir: None,
            reclaim_overwritten_objects: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_concurrency")]
    pub max_concurrent_blob_ops: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_blob_ops: default_concurrency(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// A table declared in configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub columns: Vec<ColumnConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    /// Defaults from the type when omitted
    #[serde(default)]
    pub storage: Option<StorageMode>,
}

impl TableConfig {
    pub fn schema(&self) -> Result<TableSchema> {
        if self.name.is_empty() {
            return Err(Error::Configuration("table name cannot be empty".into()));
        }
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let column_type: ColumnType = c.column_type.parse()?;
                let storage = c.storage.unwrap_or_else(|| StorageMode::default_for(column_type));
                Ok(ColumnSpec::new(c.name.clone(), column_type, storage))
            })
            .collect::<Result<Vec<_>>>()?;
        TableSchema::new(columns)
            .map_err(|e| Error::Configuration(format!("table {}: {e}", self.name)))
    }
}

const fn default_queue_depth() -> usize {
    1024
}

const fn default_concurrency() -> usize {
    64
}

const fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}
