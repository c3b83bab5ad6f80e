//! Versioned, immutable snapshots of a user's synchronized state.
//!
//! A [`Snapshot`] is the unit of synchronization: an immutable capture of a
//! user's enabled data sections plus metadata (save cause, pin flag,
//! timestamp). Edits never mutate in place; they produce a new snapshot with
//! a new version id. No I/O happens in this module.

mod section;

pub use section::{
    AdvancementRecord, AdvancementsData, EnderChestData, ExperienceData, InventoryData,
    LocationData, PotionEffectsData, Section, SectionKey, SectionMap, StatisticsData,
    UnknownSectionKey, VitalsData,
};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current version of the snapshot wire format.
///
/// Bumped whenever the packed representation changes incompatibly. Readers
/// refuse payloads tagged with a newer version rather than guessing.
pub const FORMAT_VERSION: u32 = 4;

/// Why a snapshot was captured.
///
/// Persisted in the database as an upper-case string of at most 32
/// characters; used for audit and for gating optional behaviors such as
/// saving a dead player's inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaveCause {
    /// Player disconnected, either logging off or switching servers.
    Disconnect,
    /// Scheduled world save.
    WorldSave,
    /// Player died.
    Death,
    /// Host process shut down.
    ServerShutdown,
    /// Inventory edited through editor tooling.
    InventoryCommand,
    /// Ender chest edited through editor tooling.
    EnderChestCommand,
    /// Data restored from an earlier snapshot.
    BackupRestore,
    /// Captured on demand through the API.
    Api,
    /// Imported from a legacy data format.
    LegacyMigration,
    /// Imported from an MPDB database.
    MpdbMigration,
    /// Cause recorded by a newer or third-party writer.
    Unknown,
}

impl SaveCause {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SaveCause::Disconnect => "DISCONNECT",
            SaveCause::WorldSave => "WORLD_SAVE",
            SaveCause::Death => "DEATH",
            SaveCause::ServerShutdown => "SERVER_SHUTDOWN",
            SaveCause::InventoryCommand => "INVENTORY_COMMAND",
            SaveCause::EnderChestCommand => "ENDERCHEST_COMMAND",
            SaveCause::BackupRestore => "BACKUP_RESTORE",
            SaveCause::Api => "API",
            SaveCause::LegacyMigration => "LEGACY_MIGRATION",
            SaveCause::MpdbMigration => "MPDB_MIGRATION",
            SaveCause::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SaveCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaveCause {
    type Err = std::convert::Infallible;

    /// Unrecognized causes written by other processes map to
    /// [`SaveCause::Unknown`] instead of failing the read.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "DISCONNECT" => SaveCause::Disconnect,
            "WORLD_SAVE" => SaveCause::WorldSave,
            "DEATH" => SaveCause::Death,
            "SERVER_SHUTDOWN" => SaveCause::ServerShutdown,
            "INVENTORY_COMMAND" => SaveCause::InventoryCommand,
            "ENDERCHEST_COMMAND" => SaveCause::EnderChestCommand,
            "BACKUP_RESTORE" => SaveCause::BackupRestore,
            "API" => SaveCause::Api,
            "LEGACY_MIGRATION" => SaveCause::LegacyMigration,
            "MPDB_MIGRATION" => SaveCause::MpdbMigration,
            _ => SaveCause::Unknown,
        })
    }
}

/// Identity record for a synchronized user.
///
/// The uuid never changes; the username is refreshed opportunistically on
/// each login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uuid: Uuid,
    pub username: String,
}

impl User {
    pub fn new(uuid: Uuid, username: impl Into<String>) -> Self {
        Self {
            uuid,
            username: username.into(),
        }
    }
}

/// An immutable, versioned capture of a user's synchronized state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    id: Uuid,
    user_id: Uuid,
    timestamp: DateTime<Utc>,
    save_cause: SaveCause,
    pinned: bool,
    format_version: u32,
    /// Set when no stored data existed and the engine synthesized an empty
    /// snapshot for a brand-new user.
    #[serde(default)]
    is_default: bool,
    data: SectionMap,
}

impl Snapshot {
    pub fn builder(user_id: Uuid) -> SnapshotBuilder {
        SnapshotBuilder::new(user_id)
    }

    /// Synthesizes the empty snapshot applied to users with no stored data.
    pub fn default_for(user_id: Uuid) -> Self {
        let mut snapshot = Self::builder(user_id).save_cause(SaveCause::Api).build();
        snapshot.is_default = true;
        snapshot
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn save_cause(&self) -> SaveCause {
        self.save_cause
    }

    pub fn pinned(&self) -> bool {
        self.pinned
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn data(&self) -> &SectionMap {
        &self.data
    }

    pub fn section(&self, key: &SectionKey) -> Option<&Section> {
        self.data.get(key)
    }

    /// Copy of this snapshot with the pin flag changed.
    ///
    /// Pinning is metadata, not payload: the version id is retained so the
    /// stored row can be updated in place.
    pub fn with_pinned(&self, pinned: bool) -> Self {
        let mut copy = self.clone();
        copy.pinned = pinned;
        copy
    }
}

/// Collects enabled data sections into an immutable [`Snapshot`].
#[derive(Debug)]
pub struct SnapshotBuilder {
    user_id: Uuid,
    id: Option<Uuid>,
    timestamp: Option<DateTime<Utc>>,
    save_cause: SaveCause,
    pinned: bool,
    data: SectionMap,
}

impl SnapshotBuilder {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            id: None,
            timestamp: None,
            save_cause: SaveCause::Api,
            pinned: false,
            data: SectionMap::new(),
        }
    }

    pub fn save_cause(mut self, cause: SaveCause) -> Self {
        self.save_cause = cause;
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    /// Overrides the generated version id. Editor tooling only.
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Overrides the capture timestamp. Editor tooling only.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn section(mut self, section: Section) -> Self {
        self.data.insert(section);
        self
    }

    pub fn sections(mut self, sections: impl IntoIterator<Item = Section>) -> Self {
        for section in sections {
            self.data.insert(section);
        }
        self
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            user_id: self.user_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            save_cause: self.save_cause,
            pinned: self.pinned,
            format_version: FORMAT_VERSION,
            is_default: false,
            data: self.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experience() -> Section {
        Section::Experience(ExperienceData {
            total_experience: 1200,
            exp_level: 12,
            exp_progress: 0.25,
        })
    }

    #[test]
    fn test_builder_stamps_identity() {
        let user = Uuid::new_v4();
        let snapshot = Snapshot::builder(user)
            .save_cause(SaveCause::Disconnect)
            .section(experience())
            .build();

        assert_eq!(snapshot.user_id(), user);
        assert_eq!(snapshot.save_cause(), SaveCause::Disconnect);
        assert_eq!(snapshot.format_version(), FORMAT_VERSION);
        assert!(!snapshot.pinned());
        assert!(!snapshot.is_default());
        assert!(snapshot.section(&SectionKey::Experience).is_some());
    }

    #[test]
    fn test_distinct_ids_per_build() {
        let user = Uuid::new_v4();
        let a = Snapshot::builder(user).build();
        let b = Snapshot::builder(user).build();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_with_pinned_keeps_version_id() {
        let snapshot = Snapshot::builder(Uuid::new_v4()).build();
        let pinned = snapshot.with_pinned(true);
        assert!(pinned.pinned());
        assert_eq!(pinned.id(), snapshot.id());
        assert!(!snapshot.pinned());
    }

    #[test]
    fn test_default_snapshot_is_empty() {
        let snapshot = Snapshot::default_for(Uuid::new_v4());
        assert!(snapshot.is_default());
        assert!(snapshot.data().is_empty());
    }

    #[test]
    fn test_save_cause_string_round_trip() {
        assert_eq!(
            "DISCONNECT".parse::<SaveCause>().unwrap(),
            SaveCause::Disconnect
        );
        assert_eq!(SaveCause::WorldSave.as_str(), "WORLD_SAVE");
        assert_eq!(
            "SOME_FUTURE_CAUSE".parse::<SaveCause>().unwrap(),
            SaveCause::Unknown
        );
    }
}
