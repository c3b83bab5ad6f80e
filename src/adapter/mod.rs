//! Snapshot packing: interconversion between [`Snapshot`] and the byte form
//! stored in the database and sent over the bus.
//!
//! Two adapters are provided, selected by configuration: plain JSON and
//! gzip-compressed JSON. Both embed the snapshot's format version; readers
//! refuse payloads tagged with a version newer than [`FORMAT_VERSION`]
//! rather than guessing at an unknown layout.

mod compressed;
mod json;

pub use compressed::CompressedJsonAdapter;
pub use json::JsonAdapter;

use std::sync::Arc;

use crate::config::SerializationConfig;
use crate::snapshot::{Snapshot, FORMAT_VERSION};

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors raised while packing or unpacking snapshots.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("failed to serialize snapshot: {0}")]
    Serialization(String),

    #[error("failed to deserialize snapshot: {0}")]
    Deserialization(String),

    #[error("snapshot format version {found} is newer than supported version {supported}")]
    IncompatibleVersion { found: u64, supported: u32 },
}

/// Packs a snapshot into bytes and back.
///
/// Implementations:
/// - `JsonAdapter`: plain JSON
/// - `CompressedJsonAdapter`: gzip-wrapped JSON
pub trait DataAdapter: Send + Sync {
    /// Pack a snapshot into its byte form.
    fn to_bytes(&self, snapshot: &Snapshot) -> Result<Vec<u8>>;

    /// Unpack a snapshot from its byte form.
    ///
    /// Fails with [`AdapterError::IncompatibleVersion`] if the payload was
    /// written by a newer format version, and
    /// [`AdapterError::Deserialization`] if the bytes are truncated or
    /// corrupt. Never produces a partially-populated snapshot.
    fn from_bytes(&self, bytes: &[u8]) -> Result<Snapshot>;
}

/// Select the adapter implementation from configuration.
pub fn init_adapter(config: &SerializationConfig) -> Arc<dyn DataAdapter> {
    if config.compress {
        Arc::new(CompressedJsonAdapter::new())
    } else {
        Arc::new(JsonAdapter::new())
    }
}

impl Snapshot {
    /// Packed size of this snapshot in bytes under the given adapter.
    pub fn file_size(&self, adapter: &dyn DataAdapter) -> Result<usize> {
        Ok(adapter.to_bytes(self)?.len())
    }
}

/// Encode a snapshot as JSON. Shared by both adapters.
pub(crate) fn encode_json(snapshot: &Snapshot) -> Result<Vec<u8>> {
    serde_json::to_vec(snapshot).map_err(|e| AdapterError::Serialization(e.to_string()))
}

/// Decode a snapshot from JSON, checking the embedded format version before
/// attempting the full parse so a future layout reports the version mismatch
/// rather than a confusing field error.
pub(crate) fn decode_json(bytes: &[u8]) -> Result<Snapshot> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| AdapterError::Deserialization(e.to_string()))?;

    // Compared in u64 so an absurdly large tag cannot wrap into range
    let found = value
        .get("format_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            AdapterError::Deserialization("missing format_version tag".to_string())
        })?;
    if found > u64::from(FORMAT_VERSION) {
        return Err(AdapterError::IncompatibleVersion {
            found,
            supported: FORMAT_VERSION,
        });
    }

    serde_json::from_value(value).map_err(|e| AdapterError::Deserialization(e.to_string()))
}
