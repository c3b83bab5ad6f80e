//! Application configuration.
//!
//! Aggregates configuration for all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod cache;
mod storage;
mod sync;

pub use cache::CacheConfig;
pub use storage::{SqliteConfig, StorageConfig, StorageType};
pub use sync::{FeaturesConfig, NotifySlot, SerializationConfig, SyncConfig};

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "SHARDSYNC_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SHARDSYNC";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "SHARDSYNC_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier of the synchronized group of servers this process belongs
    /// to. Servers only exchange data within their own cluster, so several
    /// independent networks can share one Redis/database deployment.
    pub cluster_id: String,
    /// Durable store configuration.
    pub storage: StorageConfig,
    /// Cache/bus tier configuration.
    pub cache: CacheConfig,
    /// Synchronization behavior.
    pub synchronization: SyncConfig,
    /// Snapshot packing.
    pub serialization: SerializationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_id: "main".to_string(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            synchronization: SyncConfig::default(),
            serialization: SerializationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `SHARDSYNC_CONFIG` environment variable (if set)
    /// 4. Environment variables with `SHARDSYNC` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
