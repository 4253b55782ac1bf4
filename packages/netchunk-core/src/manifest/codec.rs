//! The stable JSON wire format for manifests.
//!
//! The same JSON is written to the local manifest cache and to every
//! configured server, so the schema must stay readable by every version of
//! the engine:
//!
//! - Unknown top-level keys are ignored (forward compatibility) and never
//!   re-serialized.
//! - Numeric fields that arrive as integer-valued floats are accepted.
//! - `original_size`, written by older manifests, is accepted as an alias
//!   of `total_size` on read and never written.
//! - Missing required fields make the manifest `ManifestCorrupt`.

use serde_json::{json, Map, Value};

use crate::crypto::{digest_from_hex, digest_to_hex};
use crate::error::{Error, Result};
use crate::manifest::{Chunk, Manifest, Placement};

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Serialize a manifest to its canonical JSON form.
///
/// The manifest is validated first; an invariant-violating manifest is
/// never written.
pub fn to_json(manifest: &Manifest) -> Result<String> {
    manifest.validate()?;

    let chunks: Vec<Value> = manifest.chunks.iter().map(chunk_to_value).collect();

    let root = json!({
        "version": manifest.version,
        "manifest_id": manifest.manifest_id,
        "original_filename": manifest.remote_name,
        "total_size": manifest.total_size,
        "chunk_size": manifest.chunk_size,
        "chunk_count": manifest.chunk_count(),
        "file_hash": digest_to_hex(&manifest.file_hash),
        "created_timestamp": manifest.created_at,
        "last_accessed": manifest.last_accessed,
        "last_modified": manifest.last_modified,
        "last_verified": manifest.last_verified,
        "replication_factor": manifest.replication_factor,
        "min_replicas_required": manifest.min_replicas_required,
        "creator_info": manifest.creator_info,
        "comment": manifest.comment,
        "chunks": chunks,
    });

    serde_json::to_string_pretty(&root).map_err(Error::from)
}

fn chunk_to_value(chunk: &Chunk) -> Value {
    let locations: Vec<Value> = chunk
        .locations
        .iter()
        .map(|loc| {
            json!({
                "server_id": loc.server_id,
                "remote_path": loc.remote_path,
                "upload_time": loc.uploaded_at,
                "verified": loc.verified,
                "last_verified": loc.last_verified_at,
            })
        })
        .collect();

    json!({
        "id": chunk.id,
        "sequence_number": chunk.sequence,
        "size": chunk.size,
        "created_timestamp": chunk.created_at,
        "hash": digest_to_hex(&chunk.hash),
        "locations": locations,
    })
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a manifest from JSON and validate it.
pub fn from_json(input: &str) -> Result<Manifest> {
    let root: Value = serde_json::from_str(input)
        .map_err(|e| Error::ManifestCorrupt(format!("invalid JSON: {}", e)))?;
    let root = root
        .as_object()
        .ok_or_else(|| Error::ManifestCorrupt("manifest is not a JSON object".into()))?;

    // total_size with the legacy original_size alias
    let total_size = match get_u64(root, "total_size") {
        Ok(size) => size,
        Err(_) => get_u64(root, "original_size")
            .map_err(|_| Error::ManifestCorrupt("missing field 'total_size'".into()))?,
    };

    let chunks_value = root
        .get("chunks")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::ManifestCorrupt("missing or non-array 'chunks'".into()))?;

    let mut chunks = Vec::with_capacity(chunks_value.len());
    for (i, value) in chunks_value.iter().enumerate() {
        chunks.push(
            chunk_from_value(value)
                .map_err(|e| Error::ManifestCorrupt(format!("chunk {}: {}", i, e)))?,
        );
    }

    let declared_count = get_u64(root, "chunk_count")?;
    if declared_count != chunks.len() as u64 {
        return Err(Error::ManifestCorrupt(format!(
            "chunk_count says {}, chunks array has {}",
            declared_count,
            chunks.len()
        )));
    }

    let manifest = Manifest {
        manifest_id: get_str(root, "manifest_id")?,
        version: get_str(root, "version")?,
        remote_name: get_str(root, "original_filename")?,
        total_size,
        file_hash: digest_from_hex(&get_str(root, "file_hash")?)
            .map_err(|e| Error::ManifestCorrupt(format!("file_hash: {}", e)))?,
        chunk_size: get_u64(root, "chunk_size")?,
        replication_factor: get_u32(root, "replication_factor")?,
        min_replicas_required: get_u32(root, "min_replicas_required")?,
        created_at: get_i64(root, "created_timestamp")?,
        last_accessed: get_i64(root, "last_accessed")?,
        last_modified: get_i64(root, "last_modified")?,
        last_verified: get_i64(root, "last_verified")?,
        creator_info: get_str(root, "creator_info").unwrap_or_default(),
        comment: get_str(root, "comment").unwrap_or_default(),
        chunks,
    };

    manifest.validate()?;
    Ok(manifest)
}

fn chunk_from_value(value: &Value) -> Result<Chunk> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::ManifestCorrupt("chunk is not a JSON object".into()))?;

    let mut locations = Vec::new();
    if let Some(array) = obj.get("locations").and_then(Value::as_array) {
        for loc_value in array {
            let loc = loc_value
                .as_object()
                .ok_or_else(|| Error::ManifestCorrupt("location is not a JSON object".into()))?;
            locations.push(Placement {
                server_id: get_str(loc, "server_id")?,
                remote_path: get_str(loc, "remote_path")?,
                uploaded_at: get_i64(loc, "upload_time")?,
                verified: get_bool(loc, "verified").unwrap_or(false),
                last_verified_at: get_i64(loc, "last_verified").unwrap_or(0),
            });
        }
    }

    Ok(Chunk {
        id: get_str(obj, "id")?,
        sequence: get_u32(obj, "sequence_number")?,
        size: get_u64(obj, "size")?,
        hash: digest_from_hex(&get_str(obj, "hash")?)
            .map_err(|e| Error::ManifestCorrupt(format!("hash: {}", e)))?,
        created_at: get_i64(obj, "created_timestamp").unwrap_or(0),
        locations,
    })
}

// ---------------------------------------------------------------------------
// Tolerant field extraction
// ---------------------------------------------------------------------------

fn get_str(obj: &Map<String, Value>, key: &str) -> Result<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::ManifestCorrupt(format!("missing field '{}'", key)))
}

fn get_bool(obj: &Map<String, Value>, key: &str) -> Result<bool> {
    obj.get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| Error::ManifestCorrupt(format!("missing field '{}'", key)))
}

/// Accepts integers and integer-valued floats (some writers emit `3.0`).
fn get_i64(obj: &Map<String, Value>, key: &str) -> Result<i64> {
    let value = obj
        .get(key)
        .ok_or_else(|| Error::ManifestCorrupt(format!("missing field '{}'", key)))?;

    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    if let Some(f) = value.as_f64() {
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
            return Ok(f as i64);
        }
    }
    Err(Error::ManifestCorrupt(format!("field '{}' is not an integer", key)))
}

fn get_u64(obj: &Map<String, Value>, key: &str) -> Result<u64> {
    let n = get_i64(obj, key)?;
    u64::try_from(n)
        .map_err(|_| Error::ManifestCorrupt(format!("field '{}' is negative", key)))
}

fn get_u32(obj: &Map<String, Value>, key: &str) -> Result<u32> {
    let n = get_u64(obj, key)?;
    u32::try_from(n)
        .map_err(|_| Error::ManifestCorrupt(format!("field '{}' out of range", key)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;
    use crate::manifest::CHUNK_ID_LEN;

    fn sample_manifest() -> Manifest {
        let mut manifest = Manifest::new("photos.tar", 2100, 1024, sha256(b"whole file"), 2, 1);
        for sequence in 0u32..3 {
            let size = if sequence == 2 { 52 } else { 1024 };
            let mut chunk = Chunk::new(
                format!("{:08x}{}", sequence, "f".repeat(CHUNK_ID_LEN - 8)),
                sequence,
                size,
                sha256(&[sequence as u8]),
            );
            chunk
                .add_location(Placement::new("alpha", format!("/base/chunks/m/{}", sequence)))
                .unwrap();
            manifest.add_chunk(chunk).unwrap();
        }
        manifest
    }

    #[test]
    fn test_round_trip() {
        let manifest = sample_manifest();
        let json = to_json(&manifest).unwrap();
        let parsed = from_json(&json).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_unknown_keys_ignored_and_not_reserialized() {
        let manifest = sample_manifest();
        let json = to_json(&manifest).unwrap();

        let mut value: Value = serde_json::from_str(&json).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("future_flag".into(), Value::Bool(true));
        let with_extra = serde_json::to_string(&value).unwrap();

        let parsed = from_json(&with_extra).unwrap();
        assert_eq!(parsed, manifest);

        let reserialized = to_json(&parsed).unwrap();
        assert!(!reserialized.contains("future_flag"));
    }

    #[test]
    fn test_integer_valued_floats_accepted() {
        let manifest = sample_manifest();
        let json = to_json(&manifest).unwrap();

        let mut value: Value = serde_json::from_str(&json).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.insert("total_size".into(), json!(2100.0));
        obj.insert("replication_factor".into(), json!(2.0));

        let parsed = from_json(&serde_json::to_string(&value).unwrap()).unwrap();
        assert_eq!(parsed.total_size, 2100);
        assert_eq!(parsed.replication_factor, 2);
    }

    #[test]
    fn test_fractional_number_rejected() {
        let manifest = sample_manifest();
        let json = to_json(&manifest).unwrap();

        let mut value: Value = serde_json::from_str(&json).unwrap();
        value.as_object_mut().unwrap().insert("total_size".into(), json!(2100.5));

        let err = from_json(&serde_json::to_string(&value).unwrap()).unwrap_err();
        assert_eq!(err.short_str(), "manifest corrupt");
    }

    #[test]
    fn test_original_size_alias() {
        let manifest = sample_manifest();
        let json = to_json(&manifest).unwrap();

        let mut value: Value = serde_json::from_str(&json).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("total_size");
        obj.insert("original_size".into(), json!(2100));

        let parsed = from_json(&serde_json::to_string(&value).unwrap()).unwrap();
        assert_eq!(parsed.total_size, 2100);

        // The alias is never written back.
        assert!(!to_json(&parsed).unwrap().contains("original_size"));
    }

    #[test]
    fn test_missing_required_field_is_corrupt() {
        let manifest = sample_manifest();
        let json = to_json(&manifest).unwrap();

        for key in ["version", "manifest_id", "file_hash", "chunks", "chunk_count"] {
            let mut value: Value = serde_json::from_str(&json).unwrap();
            value.as_object_mut().unwrap().remove(key);
            let err = from_json(&serde_json::to_string(&value).unwrap()).unwrap_err();
            assert_eq!(err.short_str(), "manifest corrupt", "dropping '{}'", key);
        }
    }

    #[test]
    fn test_chunk_count_mismatch_is_corrupt() {
        let manifest = sample_manifest();
        let json = to_json(&manifest).unwrap();

        let mut value: Value = serde_json::from_str(&json).unwrap();
        value.as_object_mut().unwrap().insert("chunk_count".into(), json!(7));

        assert!(from_json(&serde_json::to_string(&value).unwrap()).is_err());
    }

    #[test]
    fn test_garbage_input_is_corrupt() {
        assert!(from_json("not json at all").is_err());
        assert!(from_json("[1, 2, 3]").is_err());
        assert!(from_json("{}").is_err());
    }

    #[test]
    fn test_empty_manifest_round_trip() {
        let manifest = Manifest::new("empty.bin", 0, 1024, sha256(b""), 1, 1);
        let parsed = from_json(&to_json(&manifest).unwrap()).unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(parsed.chunk_count(), 0);
    }
}
