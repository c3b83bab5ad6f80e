//! Mock Broker implementation for testing.
//!
//! [`MockBroker::handle`] mints a new process identity over the same shared
//! state, so several "processes" can be wired to one bus the way real
//! deployments share one Redis. TTL expiry follows the tokio clock and
//! works with `tokio::time::pause`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{Broker, BrokerError, BusHandler, BusMessage, KeyType, MessageKind, Result};

struct CacheEntry {
    payload: Vec<u8>,
    expires_at: Instant,
}

/// In-memory [`Broker`].
#[derive(Clone)]
pub struct MockBroker {
    node_id: Uuid,
    cluster_id: String,
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    handlers: Arc<Mutex<Vec<(Uuid, Arc<dyn BusHandler>)>>>,
    published: Arc<Mutex<Vec<BusMessage>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl MockBroker {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            node_id: Uuid::new_v4(),
            cluster_id: cluster_id.into(),
            entries: Arc::new(Mutex::new(HashMap::new())),
            handlers: Arc::new(Mutex::new(Vec::new())),
            published: Arc::new(Mutex::new(Vec::new())),
            unavailable: Arc::new(Mutex::new(false)),
        }
    }

    /// Another process on the same bus: shared cache and channel, distinct
    /// node identity. Plain `clone()` stays within the same process.
    pub fn handle(&self) -> Self {
        Self {
            node_id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    /// Simulate a bus outage: every operation fails until cleared.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().await = unavailable;
    }

    /// Messages published so far (updates and replies).
    pub async fn published(&self) -> Vec<BusMessage> {
        self.published.lock().await.clone()
    }

    async fn check_available(&self) -> Result<()> {
        if *self.unavailable.lock().await {
            return Err(BrokerError::Connection("mock bus outage".to_string()));
        }
        Ok(())
    }

    async fn set_key(&self, key_type: KeyType, user: Uuid, payload: Vec<u8>) -> Result<()> {
        self.check_available().await?;
        self.entries.lock().await.insert(
            key_type.key(&self.cluster_id, user),
            CacheEntry {
                payload,
                expires_at: Instant::now() + key_type.ttl(),
            },
        );
        Ok(())
    }

    async fn take_key(&self, key_type: KeyType, user: Uuid) -> Result<Option<Vec<u8>>> {
        self.check_available().await?;
        let key = key_type.key(&self.cluster_id, user);
        let mut entries = self.entries.lock().await;
        match entries.remove(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.payload)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn set_user_data(&self, user: Uuid, payload: &[u8]) -> Result<()> {
        self.set_key(KeyType::DataUpdate, user, payload.to_vec()).await
    }

    async fn consume_user_data(&self, user: Uuid) -> Result<Option<Vec<u8>>> {
        self.take_key(KeyType::DataUpdate, user).await
    }

    async fn set_server_switch(&self, user: Uuid) -> Result<()> {
        self.set_key(KeyType::ServerSwitch, user, Vec::new()).await
    }

    async fn consume_server_switch(&self, user: Uuid) -> Result<bool> {
        Ok(self.take_key(KeyType::ServerSwitch, user).await?.is_some())
    }

    async fn cache_latest(&self, user: Uuid, payload: &[u8]) -> Result<()> {
        self.set_key(KeyType::Cache, user, payload.to_vec()).await
    }

    async fn get_cached_latest(&self, user: Uuid) -> Result<Option<Vec<u8>>> {
        self.check_available().await?;
        let key = KeyType::Cache.key(&self.cluster_id, user);
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.payload.clone()))
    }

    async fn publish_update(&self, user: Uuid, payload: &[u8]) -> Result<()> {
        self.check_available().await?;
        let message = BusMessage {
            kind: MessageKind::UpdateUserData,
            correlation_id: Uuid::new_v4(),
            sender: self.node_id,
            target_user: user,
            payload: payload.to_vec(),
        };
        self.published.lock().await.push(message);
        let handlers = self.handlers.lock().await.clone();
        for (node, handler) in handlers {
            // Like the channel dispatch, a process skips its own updates
            if node == self.node_id {
                continue;
            }
            handler.on_update(user, payload.to_vec()).await;
        }
        Ok(())
    }

    async fn request_user_data(&self, user: Uuid) -> Result<Option<Vec<u8>>> {
        self.check_available().await?;
        let handlers = self.handlers.lock().await.clone();
        for (_, handler) in handlers {
            if let Some(payload) = handler.local_user_data(user).await {
                // First reply wins, as with real correlation matching
                return Ok(Some(payload));
            }
        }
        // No host answered within the window
        Ok(None)
    }

    async fn subscribe(&self, handler: Arc<dyn BusHandler>) -> Result<()> {
        self.check_available().await?;
        self.handlers.lock().await.push((self.node_id, handler));
        Ok(())
    }
}
