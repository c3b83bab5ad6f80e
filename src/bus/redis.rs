//! Redis implementation of the cache/bus tier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    channel, dispatch_message, Broker, BusHandler, BusMessage, KeyType, MessageKind,
    PendingReplies, Result,
};
use crate::config::Config;

const SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_secs(2);
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Redis cache + pub/sub broker.
///
/// One instance per process, created at startup and shared through the
/// context; nothing else talks to Redis directly.
pub struct RedisBroker {
    client: Client,
    conn: ConnectionManager,
    node_id: Uuid,
    cluster_id: String,
    channel: String,
    request_timeout: Duration,
    pending: Arc<PendingReplies>,
}

impl RedisBroker {
    /// Connect to Redis and prepare the cluster channel.
    pub async fn new(config: &Config) -> Result<Self> {
        let client = Client::open(config.cache.url.as_str())?;
        let conn = ConnectionManager::new(client.clone()).await?;

        info!(url = %config.cache.url, cluster = %config.cluster_id, "Connected to Redis");

        let latency = config.synchronization.network_latency_milliseconds;
        Ok(Self {
            client,
            conn,
            node_id: Uuid::new_v4(),
            cluster_id: config.cluster_id.clone(),
            channel: channel(&config.cluster_id),
            request_timeout: Duration::from_millis(latency).max(MIN_REQUEST_TIMEOUT),
            pending: Arc::new(PendingReplies::new()),
        })
    }

    async fn set_key(&self, key_type: KeyType, user: Uuid, payload: &[u8]) -> Result<()> {
        let key = key_type.key(&self.cluster_id, user);
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(&key, payload, key_type.ttl().as_secs()).await?;
        debug!(user = %user, key_type = key_type.as_str(), "Set cache key");
        Ok(())
    }

    async fn publish_message(&self, message: &BusMessage) -> Result<()> {
        let encoded = serde_json::to_string(message)?;
        let mut conn = self.conn.clone();
        let _: () = conn.publish(&self.channel, encoded).await?;
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn set_user_data(&self, user: Uuid, payload: &[u8]) -> Result<()> {
        self.set_key(KeyType::DataUpdate, user, payload).await
    }

    async fn consume_user_data(&self, user: Uuid) -> Result<Option<Vec<u8>>> {
        let key = KeyType::DataUpdate.key(&self.cluster_id, user);
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn.get_del(&key).await?;
        debug!(user = %user, hit = bytes.is_some(), "Consumed data update key");
        Ok(bytes)
    }

    async fn set_server_switch(&self, user: Uuid) -> Result<()> {
        self.set_key(KeyType::ServerSwitch, user, &[]).await
    }

    async fn consume_server_switch(&self, user: Uuid) -> Result<bool> {
        let key = KeyType::ServerSwitch.key(&self.cluster_id, user);
        let mut conn = self.conn.clone();
        let marker: Option<Vec<u8>> = conn.get_del(&key).await?;
        Ok(marker.is_some())
    }

    async fn cache_latest(&self, user: Uuid, payload: &[u8]) -> Result<()> {
        self.set_key(KeyType::Cache, user, payload).await
    }

    async fn get_cached_latest(&self, user: Uuid) -> Result<Option<Vec<u8>>> {
        let key = KeyType::Cache.key(&self.cluster_id, user);
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn.get(&key).await?;
        Ok(bytes)
    }

    async fn publish_update(&self, user: Uuid, payload: &[u8]) -> Result<()> {
        self.publish_message(&BusMessage {
            kind: MessageKind::UpdateUserData,
            correlation_id: Uuid::new_v4(),
            sender: self.node_id,
            target_user: user,
            payload: payload.to_vec(),
        })
        .await
    }

    async fn request_user_data(&self, user: Uuid) -> Result<Option<Vec<u8>>> {
        let correlation_id = Uuid::new_v4();
        let rx = self.pending.register(correlation_id).await;

        let request = BusMessage {
            kind: MessageKind::RequestUserData,
            correlation_id,
            sender: self.node_id,
            target_user: user,
            payload: Vec::new(),
        };
        if let Err(e) = self.publish_message(&request).await {
            self.pending.forget(correlation_id).await;
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(payload)) => Ok(Some(payload)),
            // Sender dropped without replying
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.pending.forget(correlation_id).await;
                debug!(user = %user, "Data request timed out");
                Ok(None)
            }
        }
    }

    async fn subscribe(&self, handler: Arc<dyn BusHandler>) -> Result<()> {
        let client = self.client.clone();
        let mut conn = self.conn.clone();
        let node_id = self.node_id;
        let channel_name = self.channel.clone();
        let pending = Arc::clone(&self.pending);

        tokio::spawn(async move {
            loop {
                let mut pubsub = match client.get_async_pubsub().await {
                    Ok(pubsub) => pubsub,
                    Err(e) => {
                        warn!(error = %e, "Pub/sub connection failed, retrying");
                        tokio::time::sleep(SUBSCRIBE_RETRY_DELAY).await;
                        continue;
                    }
                };
                if let Err(e) = pubsub.subscribe(&channel_name).await {
                    warn!(error = %e, "Channel subscription failed, retrying");
                    tokio::time::sleep(SUBSCRIBE_RETRY_DELAY).await;
                    continue;
                }
                info!(channel = %channel_name, "Subscribed to cluster channel");

                let mut stream = pubsub.on_message();
                while let Some(message) = stream.next().await {
                    let payload: String = match message.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(error = %e, "Undecodable bus payload");
                            continue;
                        }
                    };
                    let message: BusMessage = match serde_json::from_str(&payload) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(error = %e, "Malformed bus message");
                            continue;
                        }
                    };
                    if let Some(reply) =
                        dispatch_message(message, node_id, &pending, &handler).await
                    {
                        match serde_json::to_string(&reply) {
                            Ok(encoded) => {
                                let result: redis::RedisResult<()> =
                                    conn.publish(&channel_name, encoded).await;
                                if let Err(e) = result {
                                    warn!(error = %e, "Failed to publish data return");
                                }
                            }
                            Err(e) => warn!(error = %e, "Failed to encode data return"),
                        }
                    }
                }
                warn!("Pub/sub stream ended, reconnecting");
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests require Redis running
    // Run with: cargo test --features redis -- --ignored

    #[tokio::test]
    #[ignore]
    async fn test_redis_cache_round_trip() {
        let config = Config::for_test();
        let broker = RedisBroker::new(&config)
            .await
            .expect("Failed to connect to Redis");
        let user = Uuid::new_v4();

        broker.set_user_data(user, b"payload").await.unwrap();
        assert_eq!(
            broker.consume_user_data(user).await.unwrap(),
            Some(b"payload".to_vec())
        );
        // Consumed: second read misses
        assert_eq!(broker.consume_user_data(user).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_request_times_out_without_host() {
        let config = Config::for_test();
        let broker = RedisBroker::new(&config)
            .await
            .expect("Failed to connect to Redis");

        let result = broker.request_user_data(Uuid::new_v4()).await.unwrap();
        assert_eq!(result, None);
    }
}
