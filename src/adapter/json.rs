//! Plain JSON snapshot adapter.

use super::{decode_json, encode_json, DataAdapter, Result};
use crate::snapshot::Snapshot;

/// Packs snapshots as uncompressed JSON.
///
/// Larger on the wire than [`super::CompressedJsonAdapter`] but directly
/// inspectable in the database and in Redis, which is useful when debugging
/// a deployment.
#[derive(Debug, Default)]
pub struct JsonAdapter;

impl JsonAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl DataAdapter for JsonAdapter {
    fn to_bytes(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        encode_json(snapshot)
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Snapshot> {
        decode_json(bytes)
    }
}
