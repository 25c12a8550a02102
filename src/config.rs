//! Engine configuration, loaded from a JSON file with defaults for anything missing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Data directory (SQLite event store)
    pub data_dir: PathBuf,
    /// Event store backend
    pub store: StoreConfig,
    /// HTTP listener
    pub server: ServerConfig,
    /// Query boundary: timeout and store retry policy
    pub query: QueryConfig,
    /// Suggestion model parameters
    pub model: ModelConfig,
    /// Feature extraction parameters
    pub features: FeaturesConfig,
    /// Training worker pool
    pub workers: WorkersConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// File name under `data_dir` for the sqlite backend
    pub sqlite_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// How long a request waits for a result before answering with a timeout
    pub timeout_ms: u64,
    /// Step lists kept in the result cache; least recently used beyond this are evicted
    pub cache_capacity: usize,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub maximum_interval_ms: u64,
    /// Total attempts including the first one
    pub maximum_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Seed for the split, bootstrap samples and feature subsampling
    pub seed: u64,
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Features considered per split; `None` means sqrt of the schema width
    pub max_features: Option<usize>,
    /// Minimum users required in each label class
    pub min_class_size: usize,
    /// Number of importances returned; 0 returns all
    pub top_n: usize,
    /// Fraction of users held out for the accuracy score
    pub holdout_fraction: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Add `_event_count` and `_time_to_<step>` next to the property features
    pub behavioral: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Training threads; 0 sizes the pool to the available cores
    pub training_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .map(|d| d.join("funnel-engine"))
                .unwrap_or_else(|| PathBuf::from(".funnel-engine")),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
            query: QueryConfig::default(),
            model: ModelConfig::default(),
            features: FeaturesConfig::default(),
            workers: WorkersConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_file: "events.db".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            cache_capacity: 256,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 100,
            backoff_coefficient: 2.0,
            maximum_interval_ms: 2_000,
            maximum_attempts: 3,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            n_trees: 50,
            max_depth: 4,
            min_samples_split: 2,
            max_features: None,
            min_class_size: 1,
            top_n: 8,
            holdout_fraction: 0.2,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl WorkersConfig {
    pub fn resolved_threads(&self) -> usize {
        if self.training_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.training_threads
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. A missing file yields the defaults; an unreadable or invalid
    /// one is an error so the caller can report it once logging is up.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join(&self.store.sqlite_file)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
