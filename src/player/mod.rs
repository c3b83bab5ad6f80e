//! Host-process integration surface.
//!
//! The engine never touches game state directly; it reads and writes live
//! player data through [`PlayerHandle`], implemented by the embedding host.
//! Handles must tolerate being called from any task.

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::NotifySlot;
use crate::snapshot::{Section, SectionKey};

/// A section could not be captured from or applied to a live player.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to apply section {section}: {reason}")]
pub struct ApplyError {
    pub section: SectionKey,
    pub reason: String,
}

impl ApplyError {
    pub fn new(section: SectionKey, reason: impl Into<String>) -> Self {
        Self {
            section,
            reason: reason.into(),
        }
    }
}

/// Live view of a connected player, provided by the host process.
#[async_trait]
pub trait PlayerHandle: Send + Sync {
    fn uuid(&self) -> Uuid;

    fn username(&self) -> &str;

    /// Whether the player is still connected to this process.
    async fn is_online(&self) -> bool;

    /// Whether the player is currently dead (awaiting respawn).
    async fn is_dead(&self) -> bool;

    /// Namespaced custom section keys this host can capture for the player.
    /// Hosts without plugin-registered data leave this empty.
    async fn custom_section_keys(&self) -> Vec<SectionKey> {
        Vec::new()
    }

    /// Capture one section of the player's current state.
    ///
    /// `Ok(None)` means the host has nothing for this section (for example
    /// a custom section no plugin registered); the section is simply left
    /// out of the snapshot.
    async fn snapshot_section(
        &self,
        key: &SectionKey,
    ) -> std::result::Result<Option<Section>, ApplyError>;

    /// Write one section of snapshot data onto the live player.
    async fn apply_section(&self, section: &Section) -> std::result::Result<(), ApplyError>;

    /// Show a sync status notice to the player.
    async fn send_notification(&self, slot: NotifySlot, message: &str);
}
