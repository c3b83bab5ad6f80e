//! End-to-end synchronizer scenarios over the in-memory mocks.
//!
//! Two synchronizers sharing one MockBroker and one MockDatabase stand in
//! for two server processes sharing Redis and a database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use shardsync::adapter::JsonAdapter;
use shardsync::bus::{Broker, MockBroker};
use shardsync::config::{Config, NotifySlot};
use shardsync::context::SyncContext;
use shardsync::player::{ApplyError, PlayerHandle};
use shardsync::snapshot::{
    ExperienceData, SaveCause, Section, SectionKey, Snapshot, VitalsData,
};
use shardsync::storage::{Database, MockDatabase};
use shardsync::sync::{Decision, SyncError, SyncState, Synchronizer};

/// A scriptable live player: sections are just a map, applies write into
/// it, captures read from it.
struct FakePlayer {
    uuid: Uuid,
    username: String,
    online: Mutex<bool>,
    dead: Mutex<bool>,
    fail_apply: Mutex<bool>,
    applies: Mutex<usize>,
    sections: Mutex<HashMap<SectionKey, Section>>,
    notifications: Mutex<Vec<String>>,
}

impl FakePlayer {
    fn new(uuid: Uuid, username: &str) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            username: username.to_string(),
            online: Mutex::new(true),
            dead: Mutex::new(false),
            fail_apply: Mutex::new(false),
            applies: Mutex::new(0),
            sections: Mutex::new(HashMap::new()),
            notifications: Mutex::new(Vec::new()),
        })
    }

    fn set_section(&self, section: Section) {
        self.sections.lock().unwrap().insert(section.key(), section);
    }

    fn set_online(&self, online: bool) {
        *self.online.lock().unwrap() = online;
    }

    fn set_dead(&self, dead: bool) {
        *self.dead.lock().unwrap() = dead;
    }

    fn set_fail_apply(&self, fail: bool) {
        *self.fail_apply.lock().unwrap() = fail;
    }

    fn section(&self, key: &SectionKey) -> Option<Section> {
        self.sections.lock().unwrap().get(key).cloned()
    }

    fn notifications(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }

    fn apply_count(&self) -> usize {
        *self.applies.lock().unwrap()
    }
}

#[async_trait]
impl PlayerHandle for FakePlayer {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn username(&self) -> &str {
        &self.username
    }

    async fn is_online(&self) -> bool {
        *self.online.lock().unwrap()
    }

    async fn is_dead(&self) -> bool {
        *self.dead.lock().unwrap()
    }

    async fn snapshot_section(
        &self,
        key: &SectionKey,
    ) -> Result<Option<Section>, ApplyError> {
        Ok(self.sections.lock().unwrap().get(key).cloned())
    }

    async fn apply_section(&self, section: &Section) -> Result<(), ApplyError> {
        if *self.fail_apply.lock().unwrap() {
            return Err(ApplyError::new(section.key(), "simulated apply failure"));
        }
        *self.applies.lock().unwrap() += 1;
        self.sections
            .lock()
            .unwrap()
            .insert(section.key(), section.clone());
        Ok(())
    }

    async fn send_notification(&self, _slot: NotifySlot, message: &str) {
        self.notifications.lock().unwrap().push(message.to_string());
    }
}

fn experience(level: u32) -> Section {
    Section::Experience(ExperienceData {
        total_experience: level * 100,
        exp_level: level,
        exp_progress: 0.5,
    })
}

fn vitals() -> Section {
    Section::Vitals(VitalsData {
        health: 20.0,
        max_health: 20.0,
        health_scale: 20.0,
        hunger: 20,
        saturation: 5.0,
        saturation_exhaustion: 0.0,
    })
}

struct Cluster {
    config: Config,
    database: Arc<MockDatabase>,
    broker: MockBroker,
}

impl Cluster {
    fn new() -> Self {
        let config = Config::for_test();
        Self {
            database: Arc::new(MockDatabase::new(
                config.synchronization.max_user_data_snapshots,
            )),
            broker: MockBroker::new(&config.cluster_id),
            config,
        }
    }

    /// Stand up one "server process" on the shared infrastructure.
    async fn server(&self) -> Arc<Synchronizer> {
        let ctx = SyncContext::new(
            self.config.clone(),
            Arc::clone(&self.database) as Arc<dyn Database>,
            Arc::new(self.broker.handle()),
            Arc::new(JsonAdapter::new()),
        );
        let synchronizer = Arc::new(Synchronizer::new(ctx));
        synchronizer.start().await.unwrap();
        synchronizer
    }
}

#[tokio::test]
async fn test_new_user_gets_default_snapshot() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let player = FakePlayer::new(Uuid::new_v4(), "Steve");

    server.sync_apply(player.clone()).await.unwrap();

    assert_eq!(server.state(player.uuid()).await, Some(SyncState::Synced));
    // Default snapshot is empty, so the live player is untouched
    assert!(player.section(&SectionKey::Experience).is_none());
    assert_eq!(player.notifications().len(), 1);
    // Login also refreshed the identity row
    let user = cluster
        .database
        .get_user(player.uuid())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.username, "Steve");
}

#[tokio::test]
async fn test_server_handoff_through_cache() {
    let cluster = Cluster::new();
    let server_a = cluster.server().await;
    let server_b = cluster.server().await;
    let uuid = Uuid::new_v4();

    // Session on server A: join, play, quit
    let player_a = FakePlayer::new(uuid, "Alex");
    server_a.sync_apply(player_a.clone()).await.unwrap();
    player_a.set_section(experience(30));
    player_a.set_section(vitals());
    server_a.handle_quit(player_a.clone()).await;
    assert_eq!(server_a.state(uuid).await, None);

    // Join server B: the quit data arrives via the handoff key
    let player_b = FakePlayer::new(uuid, "Alex");
    server_b.sync_apply(player_b.clone()).await.unwrap();

    assert_eq!(player_b.section(&SectionKey::Experience), Some(experience(30)));
    assert_eq!(player_b.section(&SectionKey::Vitals), Some(vitals()));
    // The store holds the same history as a durable backstop
    let stored = cluster.database.get_latest_snapshot(uuid).await.unwrap().unwrap();
    assert_eq!(stored.save_cause(), SaveCause::Disconnect);
}

#[tokio::test]
async fn test_falls_back_to_durable_store() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let uuid = Uuid::new_v4();

    let stored = Snapshot::builder(uuid)
        .save_cause(SaveCause::WorldSave)
        .section(experience(7))
        .build();
    cluster.database.save_snapshot(&stored).await.unwrap();

    let player = FakePlayer::new(uuid, "Alex");
    server.sync_apply(player.clone()).await.unwrap();

    assert_eq!(player.section(&SectionKey::Experience), Some(experience(7)));
}

#[tokio::test]
async fn test_live_request_reaches_hosting_server() {
    let cluster = Cluster::new();
    let server_a = cluster.server().await;
    let server_b = cluster.server().await;
    let uuid = Uuid::new_v4();

    // Player online and synced on A, with live state that was never saved
    let player_a = FakePlayer::new(uuid, "Alex");
    server_a.sync_apply(player_a.clone()).await.unwrap();
    player_a.set_section(experience(42));

    // B resolves the same user: no handoff key, no stored rows, so the
    // bus request reaches A and captures its live state
    let player_b = FakePlayer::new(uuid, "Alex");
    server_b.sync_apply(player_b.clone()).await.unwrap();

    assert_eq!(player_b.section(&SectionKey::Experience), Some(experience(42)));
}

#[tokio::test]
async fn test_concurrent_sync_is_rejected() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let player = FakePlayer::new(Uuid::new_v4(), "Steve");

    server.sync_apply(player.clone()).await.unwrap();
    let second = server.sync_apply(player.clone()).await;
    assert!(matches!(second, Err(SyncError::AlreadyLocked(_))));
}

#[tokio::test]
async fn test_veto_hook_leaves_player_untouched() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let uuid = Uuid::new_v4();

    let stored = Snapshot::builder(uuid)
        .save_cause(SaveCause::WorldSave)
        .section(experience(3))
        .build();
    cluster.database.save_snapshot(&stored).await.unwrap();

    server.set_hook(Arc::new(|_| Decision::Cancel)).await;
    let player = FakePlayer::new(uuid, "Steve");
    let result = server.sync_apply(player.clone()).await;

    assert!(matches!(result, Err(SyncError::Vetoed)));
    assert!(player.section(&SectionKey::Experience).is_none());
    // Lock released, so a later attempt can proceed
    assert_eq!(server.state(uuid).await, None);
}

#[tokio::test]
async fn test_hook_can_rewrite_snapshot() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let uuid = Uuid::new_v4();

    let stored = Snapshot::builder(uuid)
        .save_cause(SaveCause::WorldSave)
        .section(experience(3))
        .build();
    cluster.database.save_snapshot(&stored).await.unwrap();

    server
        .set_hook(Arc::new(|snapshot: Snapshot| {
            let rewritten = Snapshot::builder(snapshot.user_id())
                .save_cause(snapshot.save_cause())
                .section(experience(99))
                .build();
            Decision::Proceed(rewritten)
        }))
        .await;

    let player = FakePlayer::new(uuid, "Steve");
    server.sync_apply(player.clone()).await.unwrap();
    assert_eq!(player.section(&SectionKey::Experience), Some(experience(99)));
}

#[tokio::test]
async fn test_failed_apply_quarantines_session() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let uuid = Uuid::new_v4();

    let stored = Snapshot::builder(uuid)
        .save_cause(SaveCause::WorldSave)
        .section(experience(3))
        .build();
    cluster.database.save_snapshot(&stored).await.unwrap();

    let player = FakePlayer::new(uuid, "Steve");
    player.set_fail_apply(true);
    let result = server.sync_apply(player.clone()).await;

    assert!(matches!(result, Err(SyncError::Apply(_))));
    assert_eq!(server.state(uuid).await, Some(SyncState::Failed));
    assert_eq!(player.notifications().len(), 1);

    // The quarantined session must not overwrite the stored history
    player.set_fail_apply(false);
    let save = server.sync_save(player.clone(), SaveCause::WorldSave).await;
    assert!(matches!(save, Err(SyncError::AlreadyLocked(_))));
    let latest = cluster.database.get_latest_snapshot(uuid).await.unwrap().unwrap();
    assert_eq!(latest.id(), stored.id());
}

#[tokio::test]
async fn test_store_outage_fails_sync_instead_of_defaulting() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let player = FakePlayer::new(Uuid::new_v4(), "Steve");

    cluster.database.set_unavailable(true).await;
    let result = server.sync_apply(player.clone()).await;

    // An unreadable store must never be mistaken for a brand-new user
    assert!(matches!(result, Err(SyncError::Storage(_))));
    assert_eq!(server.state(player.uuid()).await, Some(SyncState::Failed));
}

#[tokio::test]
async fn test_bus_outage_degrades_to_store() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let uuid = Uuid::new_v4();

    let stored = Snapshot::builder(uuid)
        .save_cause(SaveCause::WorldSave)
        .section(experience(5))
        .build();
    cluster.database.save_snapshot(&stored).await.unwrap();

    cluster.broker.set_unavailable(true).await;
    let player = FakePlayer::new(uuid, "Steve");
    server.sync_apply(player.clone()).await.unwrap();

    assert_eq!(player.section(&SectionKey::Experience), Some(experience(5)));
}

#[tokio::test]
async fn test_dead_player_inventory_gating() {
    let mut config = Config::for_test();
    config.synchronization.save_dead_player_inventories = false;
    let database = Arc::new(MockDatabase::new(16));
    let cluster = Cluster {
        broker: MockBroker::new(&config.cluster_id),
        database: Arc::clone(&database),
        config,
    };
    let server = cluster.server().await;
    let uuid = Uuid::new_v4();

    let player = FakePlayer::new(uuid, "Steve");
    server.sync_apply(player.clone()).await.unwrap();
    player.set_section(Section::Inventory(shardsync::snapshot::InventoryData {
        serialized_items: "rO0ABXNyAA==".to_string(),
        held_item_slot: 0,
    }));
    player.set_section(experience(12));
    player.set_dead(true);

    server.sync_save(player.clone(), SaveCause::Death).await.unwrap();

    let saved = database.get_latest_snapshot(uuid).await.unwrap().unwrap();
    assert!(saved.section(&SectionKey::Inventory).is_none());
    assert_eq!(
        saved.section(&SectionKey::Experience),
        Some(&experience(12))
    );
}

#[tokio::test(start_paused = true)]
async fn test_switch_marker_waits_for_handoff_data() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let uuid = Uuid::new_v4();

    // Marker present but the data key never arrives; the join must still
    // complete from the store after the bounded wait
    cluster.broker.set_server_switch(uuid).await.unwrap();
    let stored = Snapshot::builder(uuid)
        .save_cause(SaveCause::Disconnect)
        .section(experience(8))
        .build();
    cluster.database.save_snapshot(&stored).await.unwrap();

    let player = FakePlayer::new(uuid, "Alex");
    server.sync_apply(player.clone()).await.unwrap();
    assert_eq!(player.section(&SectionKey::Experience), Some(experience(8)));
}

#[tokio::test]
async fn test_pushed_update_applies_to_synced_player() {
    let cluster = Cluster::new();
    let server_a = cluster.server().await;
    let uuid = Uuid::new_v4();

    let player_a = FakePlayer::new(uuid, "Alex");
    server_a.sync_apply(player_a.clone()).await.unwrap();

    // Another process editing this user's data announces it on the bus
    let snapshot = Snapshot::builder(uuid)
        .save_cause(SaveCause::Api)
        .section(experience(21))
        .build();
    let adapter = JsonAdapter::new();
    let packed = shardsync::adapter::DataAdapter::to_bytes(&adapter, &snapshot).unwrap();
    cluster.broker.publish_update(uuid, &packed).await.unwrap();

    assert_eq!(player_a.section(&SectionKey::Experience), Some(experience(21)));
}

#[tokio::test]
async fn test_save_does_not_echo_back_onto_saver() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let uuid = Uuid::new_v4();

    let player = FakePlayer::new(uuid, "Steve");
    server.sync_apply(player.clone()).await.unwrap();
    player.set_section(experience(4));
    let applied_before = player.apply_count();

    // The save's own update announcement must not be re-applied to the
    // player it was just captured from
    server.sync_save(player.clone(), SaveCause::WorldSave).await.unwrap();
    assert_eq!(player.apply_count(), applied_before);

    server.handle_quit(player.clone()).await;
    assert_eq!(player.apply_count(), applied_before);
}

#[tokio::test]
async fn test_offline_host_stays_quiet_on_bus_requests() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let uuid = Uuid::new_v4();

    let player = FakePlayer::new(uuid, "Alex");
    server.sync_apply(player.clone()).await.unwrap();
    player.set_section(experience(9));

    assert!(cluster.broker.request_user_data(uuid).await.unwrap().is_some());

    // Once the player has dropped off this process, its stale tracking
    // entry must not answer for them
    player.set_online(false);
    assert!(cluster.broker.request_user_data(uuid).await.unwrap().is_none());
}

#[tokio::test]
async fn test_offline_read_served_from_cache() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let uuid = Uuid::new_v4();

    let player = FakePlayer::new(uuid, "Alex");
    server.sync_apply(player.clone()).await.unwrap();
    player.set_section(experience(11));
    server.handle_quit(player).await;

    // The quit save refreshed the 24h read cache, so an offline lookup
    // works even with the store down
    cluster.database.set_unavailable(true).await;
    let latest = server.latest_snapshot(uuid).await.unwrap().unwrap();
    assert_eq!(
        latest.section(&SectionKey::Experience),
        Some(&experience(11))
    );
}

#[tokio::test]
async fn test_world_save_rotation_over_sessions() {
    let cluster = Cluster::new();
    let server = cluster.server().await;
    let uuid = Uuid::new_v4();

    let player = FakePlayer::new(uuid, "Steve");
    server.sync_apply(player.clone()).await.unwrap();
    player.set_section(experience(1));

    for _ in 0..20 {
        server.sync_save(player.clone(), SaveCause::WorldSave).await.unwrap();
    }

    let history = cluster.database.get_all_snapshots(uuid).await.unwrap();
    assert_eq!(history.len(), 16);
}
