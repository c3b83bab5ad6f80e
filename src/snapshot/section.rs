//! Typed data sections carried by a snapshot.
//!
//! Each section is independently optional: a snapshot only carries the
//! sections that were enabled network-wide when it was captured. Custom
//! sections registered by other plugins travel as opaque JSON under a
//! namespaced key (`namespace:key`) and survive round-trips through
//! processes that do not recognize them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{Error as DeError, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifies a data section within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionKey {
    Inventory,
    EnderChest,
    Vitals,
    Experience,
    PotionEffects,
    Advancements,
    Statistics,
    Location,
    /// Plugin-registered data, keyed by a namespaced string (`namespace:key`).
    Custom(String),
}

impl SectionKey {
    /// All built-in section keys, in application order.
    pub const STANDARD: [SectionKey; 8] = [
        SectionKey::Inventory,
        SectionKey::EnderChest,
        SectionKey::Vitals,
        SectionKey::Experience,
        SectionKey::PotionEffects,
        SectionKey::Advancements,
        SectionKey::Statistics,
        SectionKey::Location,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            SectionKey::Inventory => "inventory",
            SectionKey::EnderChest => "ender_chest",
            SectionKey::Vitals => "vitals",
            SectionKey::Experience => "experience",
            SectionKey::PotionEffects => "potion_effects",
            SectionKey::Advancements => "advancements",
            SectionKey::Statistics => "statistics",
            SectionKey::Location => "location",
            SectionKey::Custom(key) => key,
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionKey {
    type Err = UnknownSectionKey;

    /// Parses a wire key. Namespaced keys (containing `:`) map to
    /// [`SectionKey::Custom`]; anything else unrecognized is an error so
    /// the caller can decide to drop it.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "inventory" => SectionKey::Inventory,
            "ender_chest" => SectionKey::EnderChest,
            "vitals" => SectionKey::Vitals,
            "experience" => SectionKey::Experience,
            "potion_effects" => SectionKey::PotionEffects,
            "advancements" => SectionKey::Advancements,
            "statistics" => SectionKey::Statistics,
            "location" => SectionKey::Location,
            custom if custom.contains(':') => SectionKey::Custom(custom.to_string()),
            other => return Err(UnknownSectionKey(other.to_string())),
        })
    }
}

/// A wire key that is neither built-in nor namespaced.
#[derive(Debug, thiserror::Error)]
#[error("unknown section key: {0}")]
pub struct UnknownSectionKey(pub String);

/// Inventory contents plus the selected hotbar slot.
///
/// Item stacks are platform-serialized opaquely (base64 of the platform's
/// native item encoding); the engine never inspects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryData {
    pub serialized_items: String,
    #[serde(default)]
    pub held_item_slot: u8,
}

/// Ender chest contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnderChestData {
    pub serialized_items: String,
}

/// Health, hunger and related vitals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsData {
    pub health: f64,
    pub max_health: f64,
    pub health_scale: f64,
    pub hunger: u32,
    pub saturation: f32,
    pub saturation_exhaustion: f32,
}

/// Experience points, levels and progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceData {
    pub total_experience: u32,
    pub exp_level: u32,
    pub exp_progress: f32,
}

/// Active status effects, platform-serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotionEffectsData {
    pub serialized_effects: String,
}

/// Advancement / achievement progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancementsData {
    pub completed: Vec<AdvancementRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancementRecord {
    pub key: String,
    pub completed_criteria: BTreeMap<String, DateTime<Utc>>,
}

/// Gameplay statistics, bucketed the way the game tracks them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsData {
    #[serde(default)]
    pub generic: BTreeMap<String, i64>,
    #[serde(default)]
    pub blocks: BTreeMap<String, BTreeMap<String, i64>>,
    #[serde(default)]
    pub items: BTreeMap<String, BTreeMap<String, i64>>,
    #[serde(default)]
    pub entities: BTreeMap<String, BTreeMap<String, i64>>,
}

/// World position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    pub world_name: String,
    pub world_uuid: uuid::Uuid,
    pub world_environment: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

/// One data section of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Inventory(InventoryData),
    EnderChest(EnderChestData),
    Vitals(VitalsData),
    Experience(ExperienceData),
    PotionEffects(PotionEffectsData),
    Advancements(AdvancementsData),
    Statistics(StatisticsData),
    Location(LocationData),
    /// Opaque plugin data under a namespaced key.
    Custom {
        key: String,
        value: serde_json::Value,
    },
}

impl Section {
    pub fn key(&self) -> SectionKey {
        match self {
            Section::Inventory(_) => SectionKey::Inventory,
            Section::EnderChest(_) => SectionKey::EnderChest,
            Section::Vitals(_) => SectionKey::Vitals,
            Section::Experience(_) => SectionKey::Experience,
            Section::PotionEffects(_) => SectionKey::PotionEffects,
            Section::Advancements(_) => SectionKey::Advancements,
            Section::Statistics(_) => SectionKey::Statistics,
            Section::Location(_) => SectionKey::Location,
            Section::Custom { key, .. } => SectionKey::Custom(key.clone()),
        }
    }

    /// Wire value of the section body.
    pub fn to_wire(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Section::Inventory(data) => serde_json::to_value(data),
            Section::EnderChest(data) => serde_json::to_value(data),
            Section::Vitals(data) => serde_json::to_value(data),
            Section::Experience(data) => serde_json::to_value(data),
            Section::PotionEffects(data) => serde_json::to_value(data),
            Section::Advancements(data) => serde_json::to_value(data),
            Section::Statistics(data) => serde_json::to_value(data),
            Section::Location(data) => serde_json::to_value(data),
            Section::Custom { value, .. } => Ok(value.clone()),
        }
    }

    /// Parses a wire entry back into a typed section.
    ///
    /// Returns `Ok(None)` for keys that are neither built-in nor namespaced;
    /// readers skip data they do not understand rather than failing, so
    /// unrelated processes sharing the store/bus stay compatible.
    pub fn from_wire(
        key: &str,
        value: serde_json::Value,
    ) -> Result<Option<Section>, serde_json::Error> {
        let key = match SectionKey::from_str(key) {
            Ok(key) => key,
            Err(_) => return Ok(None),
        };
        Ok(Some(match key {
            SectionKey::Inventory => Section::Inventory(serde_json::from_value(value)?),
            SectionKey::EnderChest => Section::EnderChest(serde_json::from_value(value)?),
            SectionKey::Vitals => Section::Vitals(serde_json::from_value(value)?),
            SectionKey::Experience => Section::Experience(serde_json::from_value(value)?),
            SectionKey::PotionEffects => Section::PotionEffects(serde_json::from_value(value)?),
            SectionKey::Advancements => Section::Advancements(serde_json::from_value(value)?),
            SectionKey::Statistics => Section::Statistics(serde_json::from_value(value)?),
            SectionKey::Location => Section::Location(serde_json::from_value(value)?),
            SectionKey::Custom(key) => Section::Custom { key, value },
        }))
    }
}

/// Ordered collection of sections, keyed by [`SectionKey`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionMap(BTreeMap<SectionKey, Section>);

impl SectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, section: Section) {
        self.0.insert(section.key(), section);
    }

    pub fn get(&self, key: &SectionKey) -> Option<&Section> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &SectionKey) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SectionKey, &Section)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Section> for SectionMap {
    fn from_iter<I: IntoIterator<Item = Section>>(iter: I) -> Self {
        let mut map = Self::new();
        for section in iter {
            map.insert(section);
        }
        map
    }
}

impl Serialize for SectionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, section) in &self.0 {
            let value = section.to_wire().map_err(serde::ser::Error::custom)?;
            map.serialize_entry(key.as_str(), &value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SectionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SectionMapVisitor;

        impl<'de> Visitor<'de> for SectionMapVisitor {
            type Value = SectionMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of section keys to section bodies")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut sections = SectionMap::new();
                while let Some((key, value)) = access.next_entry::<String, serde_json::Value>()? {
                    match Section::from_wire(&key, value).map_err(DeError::custom)? {
                        Some(section) => sections.insert(section),
                        // Unrecognized non-namespaced key: skipped, not failed
                        None => continue,
                    }
                }
                Ok(sections)
            }
        }

        deserializer.deserialize_map(SectionMapVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_key_round_trip() {
        for key in SectionKey::STANDARD {
            assert_eq!(key.as_str().parse::<SectionKey>().unwrap(), key);
        }
    }

    #[test]
    fn test_namespaced_key_parses_as_custom() {
        let key: SectionKey = "myplugin:waypoints".parse().unwrap();
        assert_eq!(key, SectionKey::Custom("myplugin:waypoints".to_string()));
    }

    #[test]
    fn test_plain_unknown_key_rejected() {
        assert!("waypoints".parse::<SectionKey>().is_err());
    }

    #[test]
    fn test_unknown_plain_key_dropped_on_deserialize() {
        let json = r#"{"experience":{"total_experience":100,"exp_level":3,"exp_progress":0.5},"bogus":{"a":1}}"#;
        let map: SectionMap = serde_json::from_str(json).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains(&SectionKey::Experience));
    }

    #[test]
    fn test_custom_section_preserved() {
        let json = r#"{"myplugin:homes":{"spawn":[0,64,0]}}"#;
        let map: SectionMap = serde_json::from_str(json).unwrap();
        let section = map
            .get(&SectionKey::Custom("myplugin:homes".to_string()))
            .unwrap();
        let reencoded = serde_json::to_string(&map).unwrap();
        assert!(matches!(section, Section::Custom { .. }));
        assert_eq!(reencoded, json);
    }

    #[test]
    fn test_malformed_builtin_section_fails() {
        let json = r#"{"vitals":{"health":"full"}}"#;
        assert!(serde_json::from_str::<SectionMap>(json).is_err());
    }
}
