//! Per-process engine context.
//!
//! Everything the engine needs at runtime hangs off one explicitly-passed
//! [`SyncContext`]; there is no process-global state. Construct it once at
//! startup and hand clones to whatever needs it.

use std::sync::Arc;

use crate::adapter::DataAdapter;
use crate::bus::Broker;
use crate::config::Config;
use crate::storage::Database;

/// Shared handles to the configured tiers.
#[derive(Clone)]
pub struct SyncContext {
    pub config: Arc<Config>,
    pub database: Arc<dyn Database>,
    pub broker: Arc<dyn Broker>,
    pub adapter: Arc<dyn DataAdapter>,
}

impl SyncContext {
    pub fn new(
        config: Config,
        database: Arc<dyn Database>,
        broker: Arc<dyn Broker>,
        adapter: Arc<dyn DataAdapter>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            database,
            broker,
            adapter,
        }
    }

    /// Wire up the context from configuration: adapter, durable store and
    /// cache/bus tier, in that order.
    #[cfg(all(feature = "sqlite", feature = "redis"))]
    pub async fn initialize(
        config: Config,
    ) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let adapter = crate::adapter::init_adapter(&config.serialization);
        let database = crate::storage::init_storage(&config, Arc::clone(&adapter)).await?;
        let broker = crate::utils::bootstrap::connect_with_retry("cache", &config.cache.url, || {
            crate::bus::init_broker(&config)
        })
        .await?;
        Ok(Self::new(config, database, broker, adapter))
    }
}
