//! Synchronization behavior configuration.

use serde::Deserialize;

use crate::snapshot::SectionKey;

/// Synchronization configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Unpinned snapshots retained per user; older ones rotate out.
    pub max_user_data_snapshots: u32,
    /// Expected cross-server network hop latency. Bounds how long a joining
    /// server waits for another process to answer a data request.
    pub network_latency_milliseconds: u64,
    /// Capture a snapshot when a player dies.
    pub save_on_death: bool,
    /// Record inventory/ender chest contents for dead players. When false,
    /// death-time and disconnect-while-dead captures omit both sections.
    pub save_dead_player_inventories: bool,
    /// Where sync completion/failure notices are shown.
    pub notification_display_slot: NotifySlot,
    /// Which data sections are synchronized network-wide.
    pub features: FeaturesConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_user_data_snapshots: 16,
            network_latency_milliseconds: 500,
            save_on_death: false,
            save_dead_player_inventories: true,
            notification_display_slot: NotifySlot::ActionBar,
            features: FeaturesConfig::default(),
        }
    }
}

/// Where user-visible sync notices are displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifySlot {
    Chat,
    #[default]
    ActionBar,
    None,
}

/// Per-section enablement flags.
///
/// A disabled section is neither captured nor applied anywhere on the
/// network, producing partial snapshots.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub inventory: bool,
    pub ender_chest: bool,
    pub vitals: bool,
    pub experience: bool,
    pub potion_effects: bool,
    pub advancements: bool,
    pub statistics: bool,
    pub location: bool,
    /// Plugin-registered custom sections.
    pub persistent_data: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            inventory: true,
            ender_chest: true,
            vitals: true,
            experience: true,
            potion_effects: true,
            advancements: true,
            statistics: true,
            location: false,
            persistent_data: true,
        }
    }
}

impl FeaturesConfig {
    pub fn enabled(&self, key: &SectionKey) -> bool {
        match key {
            SectionKey::Inventory => self.inventory,
            SectionKey::EnderChest => self.ender_chest,
            SectionKey::Vitals => self.vitals,
            SectionKey::Experience => self.experience,
            SectionKey::PotionEffects => self.potion_effects,
            SectionKey::Advancements => self.advancements,
            SectionKey::Statistics => self.statistics,
            SectionKey::Location => self.location,
            SectionKey::Custom(_) => self.persistent_data,
        }
    }
}

/// Snapshot packing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerializationConfig {
    /// Gzip-compress packed snapshots.
    pub compress: bool,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self { compress: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.max_user_data_snapshots, 16);
        assert_eq!(config.notification_display_slot, NotifySlot::ActionBar);
        assert!(config.save_dead_player_inventories);
        assert!(!config.save_on_death);
    }

    #[test]
    fn test_features_default_gating() {
        let features = FeaturesConfig::default();
        assert!(features.enabled(&SectionKey::Inventory));
        assert!(!features.enabled(&SectionKey::Location));
        assert!(features.enabled(&SectionKey::Custom("myplugin:homes".to_string())));
    }
}
