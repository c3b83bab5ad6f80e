//! Cache/bus tier: ephemeral keyed cache plus publish/subscribe channel.
//!
//! Two capabilities over one shared piece of infrastructure:
//!
//! 1. A keyed cache with short time-to-live, used to hand a user's freshest
//!    data between two processes faster than a durable-store round trip.
//! 2. A per-cluster pub/sub channel carrying data-changed notifications and
//!    synchronous cross-process request/reply, matched by correlation id.
//!
//! Everything here is best-effort: the durable store remains the source of
//! truth when a key has expired or a request times out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;
use uuid::Uuid;

pub mod mock;
#[cfg(feature = "redis")]
pub mod redis;

pub use mock::MockBroker;
#[cfg(feature = "redis")]
pub use redis::RedisBroker;

#[cfg(feature = "redis")]
use crate::config::Config;

/// Deployment-wide prefix shared by every cache key and channel name.
pub const KEY_NAMESPACE: &str = "shardsync";

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur during cache/bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("malformed bus message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Cache key purposes, each with its own time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Freshest packed data handed off between processes on disconnect.
    DataUpdate,
    /// Marker that a user is mid-transfer and data is about to arrive.
    ServerSwitch,
    /// General-purpose read cache of the latest snapshot.
    Cache,
}

impl KeyType {
    pub const fn ttl(&self) -> Duration {
        match self {
            KeyType::DataUpdate | KeyType::ServerSwitch => Duration::from_secs(10),
            KeyType::Cache => Duration::from_secs(60 * 60 * 24),
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            KeyType::DataUpdate => "data_update",
            KeyType::ServerSwitch => "server_switch",
            KeyType::Cache => "cache",
        }
    }

    /// Build the cache key for a user: `namespace:cluster:purpose:uuid`.
    pub fn key(&self, cluster_id: &str, user: Uuid) -> String {
        format!("{KEY_NAMESPACE}:{cluster_id}:{}:{user}", self.as_str())
    }
}

/// Pub/sub channel name for a cluster.
pub fn channel(cluster_id: &str) -> String {
    format!("{KEY_NAMESPACE}:{cluster_id}:sync")
}

/// Message type discriminator on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    UpdateUserData,
    RequestUserData,
    ReturnUserData,
}

/// Wire message exchanged on the cluster channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Matches an asynchronous reply to its originating request.
    pub correlation_id: Uuid,
    /// Process that published the message. Every process is subscribed to
    /// the channel it publishes on, so updates carry their origin and the
    /// publisher skips its own.
    pub sender: Uuid,
    pub target_user: Uuid,
    /// Packed snapshot bytes; empty for requests.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

/// Requests awaiting a RETURN_USER_DATA reply, keyed by correlation id.
///
/// The first matching reply wins and removes the entry; later duplicates
/// and replies to someone else's request find no entry and are dropped. A
/// caller that gives up must `forget` its entry so the table cannot grow.
// Only the redis backend drives these outside of tests
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
pub(crate) struct PendingReplies {
    inner: Mutex<HashMap<Uuid, oneshot::Sender<Vec<u8>>>>,
}

#[cfg_attr(not(feature = "redis"), allow(dead_code))]
impl PendingReplies {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register interest in a correlation id.
    pub(crate) async fn register(&self, correlation_id: Uuid) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(correlation_id, tx);
        rx
    }

    /// Deliver a reply. Returns false when nothing was waiting for this
    /// correlation id (duplicate reply, or not our request).
    pub(crate) async fn complete(&self, correlation_id: Uuid, payload: Vec<u8>) -> bool {
        match self.inner.lock().await.remove(&correlation_id) {
            Some(tx) => {
                // Receiver may have timed out between removal and send
                let _ = tx.send(payload);
                true
            }
            None => false,
        }
    }

    /// Drop a request that timed out.
    pub(crate) async fn forget(&self, correlation_id: Uuid) {
        self.inner.lock().await.remove(&correlation_id);
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Handle one inbound channel message for the process identified by
/// `node_id`. Returns the reply to publish when this process hosts the
/// requested user.
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
pub(crate) async fn dispatch_message(
    message: BusMessage,
    node_id: Uuid,
    pending: &PendingReplies,
    handler: &Arc<dyn BusHandler>,
) -> Option<BusMessage> {
    match message.kind {
        MessageKind::UpdateUserData => {
            // Our own update coming back around the channel
            if message.sender == node_id {
                return None;
            }
            handler.on_update(message.target_user, message.payload).await;
            None
        }
        MessageKind::RequestUserData => {
            let data = handler.local_user_data(message.target_user).await?;
            Some(BusMessage {
                kind: MessageKind::ReturnUserData,
                correlation_id: message.correlation_id,
                sender: node_id,
                target_user: message.target_user,
                payload: data,
            })
        }
        MessageKind::ReturnUserData => {
            if !pending.complete(message.correlation_id, message.payload).await {
                debug!(
                    correlation_id = %message.correlation_id,
                    "Ignoring unmatched data return"
                );
            }
            None
        }
    }
}

/// Handler for inbound bus traffic, implemented by the synchronizer.
#[async_trait]
pub trait BusHandler: Send + Sync {
    /// Packed data for a user this process is currently hosting, used to
    /// answer REQUEST_USER_DATA. Returns `None` when the user is not here
    /// (or is still mid-sync and has nothing authoritative to offer).
    async fn local_user_data(&self, user: Uuid) -> Option<Vec<u8>>;

    /// A remote process pushed fresh data for a user.
    async fn on_update(&self, user: Uuid, payload: Vec<u8>);
}

/// Interface to the cache/bus tier.
///
/// Implementations:
/// - `RedisBroker`: Redis keyed cache + pub/sub
/// - `MockBroker`: in-memory mock for testing
#[async_trait]
pub trait Broker: Send + Sync {
    /// Cache a user's freshest packed data for cross-process handoff
    /// (short TTL).
    async fn set_user_data(&self, user: Uuid, payload: &[u8]) -> Result<()>;

    /// Fetch and consume the handoff key, so churned reconnects do not
    /// re-apply stale data.
    async fn consume_user_data(&self, user: Uuid) -> Result<Option<Vec<u8>>>;

    /// Mark a user as mid-transfer between servers (short TTL).
    async fn set_server_switch(&self, user: Uuid) -> Result<()>;

    /// Check and consume the transfer marker.
    async fn consume_server_switch(&self, user: Uuid) -> Result<bool>;

    /// Cache the latest packed snapshot for general reads (long TTL).
    async fn cache_latest(&self, user: Uuid, payload: &[u8]) -> Result<()>;

    /// Read the long-TTL snapshot cache without consuming it.
    async fn get_cached_latest(&self, user: Uuid) -> Result<Option<Vec<u8>>>;

    /// Notify the cluster that a user's data changed.
    async fn publish_update(&self, user: Uuid, payload: &[u8]) -> Result<()>;

    /// Ask whichever process hosts the user for its in-memory view.
    ///
    /// Resolves `None` on timeout; a timeout is a miss, not an error, and
    /// callers fall through to the durable store.
    async fn request_user_data(&self, user: Uuid) -> Result<Option<Vec<u8>>>;

    /// Attach the handler for inbound traffic on this cluster's channel.
    async fn subscribe(&self, handler: Arc<dyn BusHandler>) -> Result<()>;
}

/// Initialize the cache/bus tier from configuration.
#[cfg(feature = "redis")]
pub async fn init_broker(
    config: &Config,
) -> std::result::Result<Arc<dyn Broker>, Box<dyn std::error::Error>> {
    let broker = RedisBroker::new(config).await?;
    Ok(Arc::new(broker))
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
