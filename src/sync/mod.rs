//! Synchronizer and per-user lock manager.
//!
//! Orchestrates the join/quit lifecycle: on join, resolve the freshest
//! snapshot across the cache, the bus and the durable store, then apply it
//! to the live player; on quit, capture and persist. A per-user state table
//! guards against applying stale data or saving a half-synchronized player.
//!
//! The durable store is the source of truth for saves: a captured snapshot
//! always lands there, and bus propagation afterwards is best-effort.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::AdapterError;
use crate::bus::{BrokerError, BusHandler};
use crate::config::NotifySlot;
use crate::context::SyncContext;
use crate::player::{ApplyError, PlayerHandle};
use crate::snapshot::{SaveCause, Section, SectionKey, Snapshot};
use crate::storage::StorageError;

/// How long and how often to re-poll the handoff key when a server-switch
/// marker says the previous server's data is still in flight.
const SWITCH_POLL_ATTEMPTS: u32 = 16;
const SWITCH_POLL_INTERVAL: Duration = Duration::from_millis(200);

const SYNC_COMPLETE_NOTICE: &str = "Your data has been synchronized";
const SYNC_FAILED_NOTICE: &str = "Your data could not be synchronized; contact an administrator";

/// Result type for synchronizer operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised by the synchronizer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The user already has a sync in progress (or a failed one) on this
    /// process.
    #[error("user {0} is locked")]
    AlreadyLocked(Uuid),

    /// A pre-apply hook cancelled the sync.
    #[error("sync vetoed by pre-apply hook")]
    Vetoed,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Per-user sync lifecycle on this process.
///
/// A user is locked (no saves, no remote answers) unless `Synced`. `Failed`
/// deliberately stays locked so a broken session cannot overwrite good
/// stored data on quit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Join in progress; resolving and applying data.
    AwaitingFetch,
    /// Data applied; the live player is authoritative.
    Synced,
    /// Apply failed; the session is quarantined until disconnect.
    Failed,
}

/// Outcome of a pre-apply hook.
pub enum Decision {
    /// Apply this snapshot (possibly modified by the hook).
    Proceed(Snapshot),
    /// Leave the player untouched and abort the sync.
    Cancel,
}

/// Hook invoked with the resolved snapshot before it touches live state.
pub type SyncHook = Arc<dyn Fn(Snapshot) -> Decision + Send + Sync>;

/// Join/quit orchestrator and lock manager. One per process.
pub struct Synchronizer {
    ctx: SyncContext,
    states: Mutex<HashMap<Uuid, SyncState>>,
    players: RwLock<HashMap<Uuid, Arc<dyn PlayerHandle>>>,
    hook: RwLock<Option<SyncHook>>,
}

impl Synchronizer {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            states: Mutex::new(HashMap::new()),
            players: RwLock::new(HashMap::new()),
            hook: RwLock::new(None),
        }
    }

    /// Attach this synchronizer to the bus so it can answer data requests
    /// and receive pushed updates.
    pub async fn start(self: &Arc<Self>) -> crate::bus::Result<()> {
        self.ctx
            .broker
            .subscribe(Arc::clone(self) as Arc<dyn BusHandler>)
            .await
    }

    /// Install the pre-apply hook.
    pub async fn set_hook(&self, hook: SyncHook) {
        *self.hook.write().await = Some(hook);
    }

    /// Current sync state for a user, if any.
    pub async fn state(&self, user: Uuid) -> Option<SyncState> {
        self.states.lock().await.get(&user).copied()
    }

    /// Handle a player joining this process: lock, resolve the freshest
    /// snapshot across the tiers, run the pre-apply hook, apply.
    pub async fn sync_apply(&self, player: Arc<dyn PlayerHandle>) -> Result<()> {
        let uuid = player.uuid();
        {
            let mut states = self.states.lock().await;
            if states.contains_key(&uuid) {
                warn!(user = %uuid, "Rejecting concurrent sync attempt");
                return Err(SyncError::AlreadyLocked(uuid));
            }
            states.insert(uuid, SyncState::AwaitingFetch);
        }
        self.players
            .write()
            .await
            .insert(uuid, Arc::clone(&player));

        // Identity row refresh is opportunistic; the sync itself can still
        // proceed from the cache tier if the store is briefly down
        if let Err(e) = self
            .ctx
            .database
            .ensure_user(uuid, player.username())
            .await
        {
            warn!(user = %uuid, error = %e, "Failed to refresh user row");
        }

        let snapshot = match self.resolve_snapshot(uuid).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(user = %uuid, error = %e, "Snapshot resolution failed");
                self.states.lock().await.insert(uuid, SyncState::Failed);
                self.notify(&player, SYNC_FAILED_NOTICE).await;
                return Err(e);
            }
        };

        let snapshot = {
            let hook = self.hook.read().await.clone();
            match hook {
                Some(hook) => match hook(snapshot) {
                    Decision::Proceed(snapshot) => snapshot,
                    Decision::Cancel => {
                        debug!(user = %uuid, "Sync cancelled by pre-apply hook");
                        self.states.lock().await.remove(&uuid);
                        self.players.write().await.remove(&uuid);
                        return Err(SyncError::Vetoed);
                    }
                },
                None => snapshot,
            }
        };

        match self.apply_snapshot(&player, &snapshot).await {
            Ok(()) => {
                self.states.lock().await.insert(uuid, SyncState::Synced);
                info!(
                    user = %uuid,
                    version = %snapshot.id(),
                    default = snapshot.is_default(),
                    "Sync complete"
                );
                self.notify(&player, SYNC_COMPLETE_NOTICE).await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    user = %uuid,
                    version = %snapshot.id(),
                    cause = %snapshot.save_cause(),
                    error = %e,
                    "Sync apply failed"
                );
                self.states.lock().await.insert(uuid, SyncState::Failed);
                self.notify(&player, SYNC_FAILED_NOTICE).await;
                Err(SyncError::Apply(e))
            }
        }
    }

    /// Capture the player's enabled sections and persist them.
    ///
    /// The store write is unconditional; cache and bus propagation
    /// afterwards is best-effort and never fails the save.
    pub async fn sync_save(&self, player: Arc<dyn PlayerHandle>, cause: SaveCause) -> Result<()> {
        let uuid = player.uuid();
        match self.state(uuid).await {
            Some(SyncState::Synced) => {}
            _ => {
                warn!(user = %uuid, cause = %cause, "Skipping save for unsynced user");
                return Err(SyncError::AlreadyLocked(uuid));
            }
        }

        let sections = self.capture_sections(&player).await?;
        let snapshot = Snapshot::builder(uuid)
            .save_cause(cause)
            .sections(sections)
            .build();
        let packed = self.ctx.adapter.to_bytes(&snapshot)?;

        if let Err(e) = self.ctx.database.save_snapshot(&snapshot).await {
            error!(user = %uuid, cause = %cause, error = %e, "Snapshot save failed");
            return Err(e.into());
        }
        debug!(
            user = %uuid,
            version = %snapshot.id(),
            cause = %cause,
            bytes = packed.len(),
            "Snapshot saved"
        );

        self.propagate(uuid, cause, &packed).await;
        Ok(())
    }

    /// Handle a player leaving this process: save if synced, then release.
    pub async fn handle_quit(&self, player: Arc<dyn PlayerHandle>) {
        let uuid = player.uuid();
        if let Err(e) = self.sync_save(Arc::clone(&player), SaveCause::Disconnect).await {
            warn!(user = %uuid, error = %e, "Quit save skipped or failed");
        }
        self.states.lock().await.remove(&uuid);
        self.players.write().await.remove(&uuid);
    }

    /// Capture a death-time snapshot when configured to.
    pub async fn handle_death(&self, player: Arc<dyn PlayerHandle>) {
        if !self.ctx.config.synchronization.save_on_death {
            return;
        }
        let uuid = player.uuid();
        if let Err(e) = self.sync_save(player, SaveCause::Death).await {
            warn!(user = %uuid, error = %e, "Death save failed");
        }
    }

    /// Save every synced player ahead of process shutdown.
    pub async fn shutdown(&self) {
        let players: Vec<Arc<dyn PlayerHandle>> =
            self.players.read().await.values().cloned().collect();
        info!(players = players.len(), "Saving all players for shutdown");
        for player in players {
            let uuid = player.uuid();
            if let Err(e) = self.sync_save(player, SaveCause::ServerShutdown).await {
                warn!(user = %uuid, error = %e, "Shutdown save failed");
            }
        }
    }

    /// Latest known snapshot for a user who may be offline anywhere on the
    /// network. Serves editor tooling and API reads from the long-TTL cache
    /// when possible, falling back to the store.
    pub async fn latest_snapshot(&self, user: Uuid) -> Result<Option<Snapshot>> {
        match self.ctx.broker.get_cached_latest(user).await {
            Ok(Some(bytes)) => match self.ctx.adapter.from_bytes(&bytes) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => {
                    warn!(user = %user, error = %e, "Discarding undecodable cached snapshot")
                }
            },
            Ok(None) => {}
            Err(e) => warn!(user = %user, error = %e, "Snapshot cache read failed"),
        }
        Ok(self.ctx.database.get_latest_snapshot(user).await?)
    }

    /// Walk the tiers for the freshest snapshot: consumable handoff key,
    /// switch-marker re-poll, live bus request, durable store, and finally
    /// an empty default for brand-new users.
    ///
    /// Cache/bus tier failures degrade to the next tier; a durable-store
    /// failure is terminal, since falling back to a default snapshot there
    /// would hand a seasoned user a blank slate.
    async fn resolve_snapshot(&self, user: Uuid) -> Result<Snapshot> {
        if let Some(snapshot) = self.consume_cached(user).await {
            debug!(user = %user, "Resolved from handoff cache");
            return Ok(snapshot);
        }

        match self.ctx.broker.consume_server_switch(user).await {
            Ok(true) => {
                // The previous server marked a transfer; its data should
                // land in the handoff key any moment now
                for _ in 0..SWITCH_POLL_ATTEMPTS {
                    tokio::time::sleep(SWITCH_POLL_INTERVAL).await;
                    if let Some(snapshot) = self.consume_cached(user).await {
                        debug!(user = %user, "Resolved from handoff cache after switch wait");
                        return Ok(snapshot);
                    }
                }
                debug!(user = %user, "Switch marker set but no data arrived");
            }
            Ok(false) => {}
            Err(e) => warn!(user = %user, error = %e, "Switch marker check failed"),
        }

        match self.ctx.broker.request_user_data(user).await {
            Ok(Some(bytes)) => match self.ctx.adapter.from_bytes(&bytes) {
                Ok(snapshot) => {
                    debug!(user = %user, "Resolved from live bus request");
                    return Ok(snapshot);
                }
                Err(e) => warn!(user = %user, error = %e, "Discarding undecodable bus reply"),
            },
            Ok(None) => {}
            Err(e) => warn!(user = %user, error = %e, "Bus data request failed"),
        }

        if let Some(snapshot) = self.ctx.database.get_latest_snapshot(user).await? {
            debug!(user = %user, version = %snapshot.id(), "Resolved from durable store");
            return Ok(snapshot);
        }

        info!(user = %user, "No stored data; applying default snapshot");
        Ok(Snapshot::default_for(user))
    }

    /// Consume the short-TTL handoff key, tolerating corrupt entries.
    async fn consume_cached(&self, user: Uuid) -> Option<Snapshot> {
        match self.ctx.broker.consume_user_data(user).await {
            Ok(Some(bytes)) => match self.ctx.adapter.from_bytes(&bytes) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(user = %user, error = %e, "Discarding undecodable handoff entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(user = %user, error = %e, "Handoff cache read failed");
                None
            }
        }
    }

    /// Apply every enabled section of a snapshot to the live player,
    /// concurrently. Sections disabled on this process are skipped even if
    /// another server captured them.
    async fn apply_snapshot(
        &self,
        player: &Arc<dyn PlayerHandle>,
        snapshot: &Snapshot,
    ) -> std::result::Result<(), ApplyError> {
        let features = &self.ctx.config.synchronization.features;
        let applies = snapshot
            .data()
            .iter()
            .filter(|(key, _)| features.enabled(key))
            .map(|(_, section)| player.apply_section(section));
        try_join_all(applies).await?;
        Ok(())
    }

    /// Capture the player's enabled sections concurrently.
    ///
    /// Dead players optionally keep their item sections out of the capture,
    /// so a death-time or disconnect-while-dead snapshot records the emptied
    /// inventory state instead of resurrecting dropped items.
    async fn capture_sections(&self, player: &Arc<dyn PlayerHandle>) -> Result<Vec<Section>> {
        let sync_config = &self.ctx.config.synchronization;
        let skip_items =
            player.is_dead().await && !sync_config.save_dead_player_inventories;

        let mut keys: Vec<SectionKey> = SectionKey::STANDARD
            .iter()
            .filter(|key| sync_config.features.enabled(key))
            .cloned()
            .collect();
        if sync_config.features.persistent_data {
            keys.extend(player.custom_section_keys().await);
        }
        if skip_items {
            keys.retain(|key| {
                !matches!(key, SectionKey::Inventory | SectionKey::EnderChest)
            });
        }

        let captures = keys.iter().map(|key| player.snapshot_section(key));
        let sections = try_join_all(captures).await?;
        Ok(sections.into_iter().flatten().collect())
    }

    /// Push a freshly-saved snapshot out to the rest of the cluster. Every
    /// step is best-effort.
    async fn propagate(&self, user: Uuid, cause: SaveCause, packed: &[u8]) {
        let broker = &self.ctx.broker;
        if cause == SaveCause::Disconnect {
            // Marker first, so a server the user is joining right now knows
            // to wait for the handoff key instead of reading a stale row
            if let Err(e) = broker.set_server_switch(user).await {
                warn!(user = %user, error = %e, "Failed to set switch marker");
            }
        }
        if let Err(e) = broker.set_user_data(user, packed).await {
            warn!(user = %user, error = %e, "Failed to set handoff key");
        }
        if let Err(e) = broker.cache_latest(user, packed).await {
            warn!(user = %user, error = %e, "Failed to refresh snapshot cache");
        }
        if let Err(e) = broker.publish_update(user, packed).await {
            warn!(user = %user, error = %e, "Failed to publish update");
        }
    }

    async fn notify(&self, player: &Arc<dyn PlayerHandle>, message: &str) {
        let slot = self.ctx.config.synchronization.notification_display_slot;
        if slot != NotifySlot::None {
            player.send_notification(slot, message).await;
        }
    }
}

#[async_trait]
impl BusHandler for Synchronizer {
    /// Answer a cross-process data request with the live player's current
    /// sections, but only once this process actually owns their state.
    async fn local_user_data(&self, user: Uuid) -> Option<Vec<u8>> {
        if self.state(user).await != Some(SyncState::Synced) {
            return None;
        }
        let player = self.players.read().await.get(&user).cloned()?;
        // A player mid-disconnect is still tracked briefly; their quit save
        // is about to become the authoritative answer, so stay quiet
        if !player.is_online().await {
            return None;
        }
        let sections = match self.capture_sections(&player).await {
            Ok(sections) => sections,
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to capture data for bus request");
                return None;
            }
        };
        let snapshot = Snapshot::builder(user)
            .save_cause(SaveCause::Api)
            .sections(sections)
            .build();
        match self.ctx.adapter.to_bytes(&snapshot) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to pack data for bus request");
                None
            }
        }
    }

    /// A remote process pushed new data for a user; apply it if they are
    /// online and synced here.
    async fn on_update(&self, user: Uuid, payload: Vec<u8>) {
        if self.state(user).await != Some(SyncState::Synced) {
            return;
        }
        let Some(player) = self.players.read().await.get(&user).cloned() else {
            return;
        };
        let snapshot = match self.ctx.adapter.from_bytes(&payload) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(user = %user, error = %e, "Discarding undecodable pushed update");
                return;
            }
        };
        if let Err(e) = self.apply_snapshot(&player, &snapshot).await {
            warn!(user = %user, error = %e, "Failed to apply pushed update");
        }
    }
}
