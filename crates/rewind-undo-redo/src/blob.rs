//! Snapshot blob encoding
//!
//! Blobs hold a versioned envelope `{"v": 1, "snapshot": {...}}` as JSON,
//! zlib-compressed unless compression is switched off. Readers inflate first
//! and fall back to the raw bytes, so uncompressed blobs written earlier stay
//! readable.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use crate::error::UndoRedoError;
use crate::snapshot::Snapshot;

/// Envelope version written by this crate
pub const BLOB_VERSION: u64 = 1;

/// Largest inflated envelope [`decode`] accepts
pub const MAX_INFLATED_BYTES: usize = 64 * 1024 * 1024;

/// Encoding knobs, taken from [`UndoConfig`](crate::config::UndoConfig)
#[derive(Debug, Clone, Copy)]
pub struct BlobOptions {
    /// zlib-compress the envelope
    pub compress: bool,
    /// Largest encoded blob accepted
    pub max_bytes: usize,
}

impl Default for BlobOptions {
    fn default() -> Self {
        Self {
            compress: true,
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Encode a snapshot into a blob
pub fn encode(snapshot: &Snapshot, options: BlobOptions) -> Result<Vec<u8>, UndoRedoError> {
    let envelope = json!({ "v": BLOB_VERSION, "snapshot": snapshot });
    let raw = serde_json::to_vec(&envelope)?;

    let bytes = if options.compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        encoder.finish()?
    } else {
        raw
    };

    if bytes.len() > options.max_bytes {
        return Err(UndoRedoError::serialization(format!(
            "snapshot blob of {} bytes exceeds the {} byte limit",
            bytes.len(),
            options.max_bytes
        )));
    }
    Ok(bytes)
}

/// Decode a blob, compressed or not
pub fn decode(bytes: &[u8]) -> Result<Snapshot, UndoRedoError> {
    decode_bounded(bytes, MAX_INFLATED_BYTES)
}

/// [`decode`] with an explicit cap on the inflated size
pub fn decode_bounded(bytes: &[u8], max_inflated: usize) -> Result<Snapshot, UndoRedoError> {
    let mut inflated = Vec::new();
    let limit = u64::try_from(max_inflated).unwrap_or(u64::MAX).saturating_add(1);
    let raw: &[u8] = match ZlibDecoder::new(bytes).take(limit).read_to_end(&mut inflated) {
        Ok(_) if inflated.len() > max_inflated => {
            return Err(UndoRedoError::serialization(format!(
                "snapshot blob inflates past the {max_inflated} byte limit"
            )))
        }
        Ok(_) => &inflated,
        Err(_) => bytes,
    };

    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| UndoRedoError::serialization(format!("corrupt snapshot blob: {e}")))?;

    let Value::Object(mut envelope) = value else {
        return Err(UndoRedoError::serialization("snapshot blob is not an envelope object"));
    };
    match envelope.get("v").and_then(Value::as_u64) {
        Some(BLOB_VERSION) => {}
        Some(other) => {
            return Err(UndoRedoError::serialization(format!(
                "unsupported snapshot blob version {other}"
            )))
        }
        None => return Err(UndoRedoError::serialization("snapshot blob has no version")),
    }
    match envelope.remove("snapshot") {
        Some(Value::Object(snapshot)) => Ok(snapshot),
        _ => Err(UndoRedoError::serialization("snapshot blob has no snapshot object")),
    }
}

/// Base64 text form of blobs inside JSON log files
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS: BlobOptions = BlobOptions {
        compress: true,
        max_bytes: 5 * 1024 * 1024,
    };

    fn sample() -> Snapshot {
        let Value::Object(map) = json!({"id": 1, "name": "joe", "pets": [{"id": 2, "name": "rex"}]}) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn test_compressed_blob_is_not_plain_json() {
        let blob = encode(&sample(), OPTIONS).unwrap();
        assert!(serde_json::from_slice::<Value>(&blob).is_err());
        assert_eq!(decode(&blob).unwrap(), sample());
    }

    #[test]
    fn test_uncompressed_blob_still_decodes() {
        let raw = serde_json::to_vec(&json!({"v": 1, "snapshot": sample()})).unwrap();
        assert_eq!(decode(&raw).unwrap(), sample());

        let blob = encode(&sample(), BlobOptions { compress: false, ..OPTIONS }).unwrap();
        assert_eq!(blob, raw);
    }

    #[test]
    fn test_corrupt_blob_is_serialization_error() {
        let err = decode(b"\x00\x01garbage").unwrap_err();
        assert!(matches!(err, UndoRedoError::Serialization(_)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let raw = serde_json::to_vec(&json!({"v": 7, "snapshot": {}})).unwrap();
        let err = decode(&raw).unwrap_err();
        assert!(err.to_string().contains("version 7"));
    }

    #[test]
    fn test_inflation_is_bounded() {
        let mut padded = sample();
        padded.insert("bio".into(), json!("a".repeat(64 * 1024)));
        let blob = encode(&padded, OPTIONS).unwrap();
        assert!(blob.len() < 1024);

        let err = decode_bounded(&blob, 4096).unwrap_err();
        assert!(matches!(err, UndoRedoError::Serialization(ref m) if m.contains("inflates past")));
        assert_eq!(decode_bounded(&blob, 128 * 1024).unwrap(), padded);
    }

    #[test]
    fn test_oversized_blob_rejected() {
        let err = encode(&sample(), BlobOptions { compress: false, max_bytes: 8 }).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
