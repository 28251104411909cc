//! Ingestor Configuration
//!
//! JSON configuration for the relevance filter and its ownership index.
//! Every field is optional; missing fields take their defaults.

use std::path::Path;
use std::sync::Arc;

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::DEFAULT_MAX_SLICE_SIZE;
use crate::cache::{DedupCache, DEFAULT_DEDUP_CAPACITY};
use crate::redis_index::RedisIndexConfig;

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level ingestor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IngestorConfig {
    /// Network whose address encoding the resolver uses
    pub network: Network,
    /// Maximum transactions per filtered slice
    pub max_slice_size: usize,
    /// Number of transaction ids kept in the dedup cache
    pub dedup_capacity: usize,
    /// Ownership index connection
    pub index: RedisIndexConfig,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            max_slice_size: DEFAULT_MAX_SLICE_SIZE,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            index: RedisIndexConfig::default(),
        }
    }
}

impl IngestorConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: IngestorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the config to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from a JSON file; a leading `~/` is expanded to the home directory
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let expanded = expand_path(path);
        let json = std::fs::read_to_string(Path::new(&expanded)).map_err(|source| {
            ConfigError::Io {
                path: expanded.clone(),
                source,
            }
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_slice_size == 0 {
            return Err(ConfigError::Invalid("maxSliceSize must be positive".to_string()));
        }
        if self.dedup_capacity == 0 {
            return Err(ConfigError::Invalid("dedupCapacity must be positive".to_string()));
        }
        if self.index.url.is_empty() {
            return Err(ConfigError::Invalid("index.url cannot be empty".to_string()));
        }
        if self.index.addresses_key.is_empty() || self.index.spends_key.is_empty() {
            return Err(ConfigError::Invalid("index keys cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Create the process-wide dedup cache sized by this config
    pub fn dedup_cache(&self) -> Arc<DedupCache> {
        Arc::new(DedupCache::new(self.dedup_capacity))
    }
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
