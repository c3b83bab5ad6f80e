//! Mock Database implementation for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Database, Result, StorageError};
use crate::snapshot::{Snapshot, User};

/// In-memory [`Database`] with the same rotation semantics as the real
/// backends.
pub struct MockDatabase {
    max_snapshots: u32,
    users: RwLock<HashMap<Uuid, User>>,
    snapshots: RwLock<HashMap<Uuid, Vec<Snapshot>>>,
    unavailable: RwLock<bool>,
}

impl MockDatabase {
    pub fn new(max_snapshots: u32) -> Self {
        Self {
            max_snapshots,
            users: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            unavailable: RwLock::new(false),
        }
    }

    /// Simulate a connectivity outage: every operation fails until cleared.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    pub async fn snapshot_count(&self, user: Uuid) -> usize {
        self.snapshots
            .read()
            .await
            .get(&user)
            .map_or(0, Vec::len)
    }

    async fn check_available(&self) -> Result<()> {
        if *self.unavailable.read().await {
            return Err(StorageError::Unavailable(
                "mock storage outage".to_string(),
            ));
        }
        Ok(())
    }

    fn rotate(&self, history: &mut Vec<Snapshot>, max: usize) {
        let mut unpinned_seen = 0;
        // History is newest-first; drop unpinned entries beyond the cap
        history.retain(|snapshot| {
            if snapshot.pinned() {
                return true;
            }
            unpinned_seen += 1;
            unpinned_seen <= max
        });
    }
}

#[async_trait]
impl Database for MockDatabase {
    async fn ensure_user(&self, uuid: Uuid, username: &str) -> Result<()> {
        self.check_available().await?;
        self.users
            .write()
            .await
            .insert(uuid, User::new(uuid, username));
        Ok(())
    }

    async fn get_user(&self, uuid: Uuid) -> Result<Option<User>> {
        self.check_available().await?;
        Ok(self.users.read().await.get(&uuid).cloned())
    }

    async fn get_user_by_name(&self, username: &str) -> Result<Option<User>> {
        self.check_available().await?;
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn get_latest_snapshot(&self, user: Uuid) -> Result<Option<Snapshot>> {
        self.check_available().await?;
        Ok(self
            .snapshots
            .read()
            .await
            .get(&user)
            .and_then(|history| history.first().cloned()))
    }

    async fn get_all_snapshots(&self, user: Uuid) -> Result<Vec<Snapshot>> {
        self.check_available().await?;
        Ok(self
            .snapshots
            .read()
            .await
            .get(&user)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_snapshot(&self, user: Uuid, version: Uuid) -> Result<Option<Snapshot>> {
        self.check_available().await?;
        Ok(self.snapshots.read().await.get(&user).and_then(|history| {
            history
                .iter()
                .find(|snapshot| snapshot.id() == version)
                .cloned()
        }))
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.check_available().await?;
        let mut store = self.snapshots.write().await;
        let history = store.entry(snapshot.user_id()).or_default();
        let position = history
            .partition_point(|existing| existing.timestamp() > snapshot.timestamp());
        history.insert(position, snapshot.clone());
        self.rotate(history, self.max_snapshots as usize);
        Ok(())
    }

    async fn update_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.check_available().await?;
        let mut store = self.snapshots.write().await;
        if let Some(history) = store.get_mut(&snapshot.user_id()) {
            if let Some(existing) = history
                .iter_mut()
                .find(|existing| existing.id() == snapshot.id())
            {
                *existing = snapshot.clone();
            }
        }
        Ok(())
    }

    async fn delete_snapshot(&self, user: Uuid, version: Uuid) -> Result<bool> {
        self.check_available().await?;
        let mut store = self.snapshots.write().await;
        let Some(history) = store.get_mut(&user) else {
            return Ok(false);
        };
        let before = history.len();
        history.retain(|snapshot| snapshot.id() != version);
        Ok(history.len() < before)
    }

    async fn pin_snapshot(&self, user: Uuid, version: Uuid) -> Result<()> {
        self.check_available().await?;
        let mut store = self.snapshots.write().await;
        if let Some(history) = store.get_mut(&user) {
            if let Some(snapshot) = history.iter_mut().find(|s| s.id() == version) {
                *snapshot = snapshot.with_pinned(true);
            }
        }
        Ok(())
    }

    async fn unpin_snapshot(&self, user: Uuid, version: Uuid) -> Result<()> {
        self.check_available().await?;
        let mut store = self.snapshots.write().await;
        if let Some(history) = store.get_mut(&user) {
            if let Some(snapshot) = history.iter_mut().find(|s| s.id() == version) {
                *snapshot = snapshot.with_pinned(false);
            }
        }
        Ok(())
    }

    async fn delete_all_snapshots(&self, user: Uuid) -> Result<()> {
        self.check_available().await?;
        self.snapshots.write().await.remove(&user);
        Ok(())
    }
}
