//! Gzip-compressed JSON snapshot adapter.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{decode_json, encode_json, AdapterError, DataAdapter, Result};
use crate::snapshot::Snapshot;

/// Packs snapshots as gzip-wrapped JSON.
///
/// This is the default adapter: snapshot payloads are dominated by
/// base64-encoded item data, which compresses well.
#[derive(Debug, Default)]
pub struct CompressedJsonAdapter;

impl CompressedJsonAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl DataAdapter for CompressedJsonAdapter {
    fn to_bytes(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        let json = encode_json(snapshot)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .and_then(|_| encoder.finish())
            .map_err(|e| AdapterError::Serialization(e.to_string()))
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Snapshot> {
        let mut decoder = GzDecoder::new(bytes);
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;
        decode_json(&json)
    }
}
