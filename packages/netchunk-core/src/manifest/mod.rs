//! # Manifest Module
//!
//! The manifest is the single index that maps one stored file to its chunks
//! and their placements. One manifest exists per stored file; it is created
//! at upload time, written once, and afterwards only touched by repair
//! (placement updates) and re-verification (timestamp updates).
//!
//! ## Ownership Tree
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         MANIFEST OWNERSHIP                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Manifest                                                              │
//! │  ├── file metadata (sizes, hashes, timestamps, replication policy)     │
//! │  └── Vec<Chunk>            ordered by sequence, 0..N-1 contiguous      │
//! │        ├── id / size / hash / sequence                                 │
//! │        └── Vec<Placement>  ordered by first-successful-put             │
//! │              └── server_id / remote_path / upload & verify times      │
//! │                                                                         │
//! │  Chunk payload bytes are NOT part of this tree: they exist only        │
//! │  in-flight, inside a single upload/download/repair operation.          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Submodules:
//! - [`codec`] - the stable JSON wire format
//! - [`store`] - local manifest cache with atomic writes and backups

pub mod codec;
pub mod store;

use crate::crypto::{digest_to_hex, HASH_LEN};
use crate::error::{Error, Result};
use crate::time::now_timestamp;

/// Manifest wire-format version tag.
pub const MANIFEST_VERSION: &str = "1.0";

/// Conventional extension for manifest objects, local and remote.
pub const MANIFEST_EXTENSION: &str = ".netchunk";

/// Length of a chunk identifier in hex characters.
///
/// The id is `sequence (8 hex) ++ file-hash prefix (4 hex) ++ 4 random
/// bytes (8 hex)`.
pub const CHUNK_ID_LEN: usize = 20;

/// Upper bound on replicas per chunk (and on the replication factor).
pub const MAX_REPLICAS: u32 = 10;

// ============================================================================
// PLACEMENT
// ============================================================================

/// One replica of one chunk: "these bytes are on server X at path P".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Configured id of the server holding the replica.
    pub server_id: String,
    /// Absolute path of the replica object on that server.
    pub remote_path: String,
    /// Unix seconds when the replica was uploaded.
    pub uploaded_at: i64,
    /// Whether a fresh download of this replica has matched the chunk hash.
    pub verified: bool,
    /// Unix seconds of the last successful verification (0 = never).
    pub last_verified_at: i64,
}

impl Placement {
    /// A freshly uploaded, not-yet-verified placement.
    pub fn new(server_id: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            remote_path: remote_path.into(),
            uploaded_at: now_timestamp(),
            verified: false,
            last_verified_at: 0,
        }
    }

    /// Mark this placement verified as of now.
    pub fn mark_verified(&mut self) {
        self.verified = true;
        self.last_verified_at = now_timestamp();
    }
}

// ============================================================================
// CHUNK
// ============================================================================

/// Metadata for one chunk of a stored file.
///
/// The payload itself is transient; at rest a chunk is its hash, its size,
/// and the list of servers holding replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Opaque 20-hex-character identifier, stable once assigned.
    pub id: String,
    /// Zero-based position within the file.
    pub sequence: u32,
    /// Payload size in bytes (`1 ..= chunk_size`).
    pub size: u64,
    /// SHA-256 of the exact payload bytes.
    pub hash: [u8; HASH_LEN],
    /// Unix seconds when the chunk was produced.
    pub created_at: i64,
    /// Replica locations, ordered by first-successful-put.
    pub locations: Vec<Placement>,
}

impl Chunk {
    /// Create a chunk record with no placements yet.
    pub fn new(id: String, sequence: u32, size: u64, hash: [u8; HASH_LEN]) -> Self {
        Self {
            id,
            sequence,
            size,
            hash,
            created_at: now_timestamp(),
            locations: Vec::new(),
        }
    }

    /// Number of recorded replicas.
    pub fn replica_count(&self) -> usize {
        self.locations.len()
    }

    /// Whether a replica is recorded on `server_id`.
    pub fn has_location(&self, server_id: &str) -> bool {
        self.locations.iter().any(|l| l.server_id == server_id)
    }

    /// The placement on `server_id`, if any.
    pub fn location_for(&self, server_id: &str) -> Option<&Placement> {
        self.locations.iter().find(|l| l.server_id == server_id)
    }

    /// Append a placement. Refuses duplicates and respects `MAX_REPLICAS`.
    pub fn add_location(&mut self, placement: Placement) -> Result<()> {
        if self.has_location(&placement.server_id) {
            return Err(Error::InvalidInput(format!(
                "chunk {} already has a replica on server '{}'",
                self.sequence, placement.server_id
            )));
        }
        if self.locations.len() as u32 >= MAX_REPLICAS {
            return Err(Error::InvalidInput(format!(
                "chunk {} already has the maximum of {} replicas",
                self.sequence, MAX_REPLICAS
            )));
        }
        self.locations.push(placement);
        Ok(())
    }

    /// Remove the placement on `server_id`. Returns whether one was removed.
    pub fn remove_location(&mut self, server_id: &str) -> bool {
        let before = self.locations.len();
        self.locations.retain(|l| l.server_id != server_id);
        self.locations.len() != before
    }

    /// Servers currently holding a replica, in placement order.
    pub fn placed_servers(&self) -> Vec<String> {
        self.locations.iter().map(|l| l.server_id.clone()).collect()
    }
}

// ============================================================================
// MANIFEST
// ============================================================================

/// The manifest for one stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Opaque unique identifier, also the remote chunk-directory name.
    pub manifest_id: String,
    /// Wire-format version tag (currently `"1.0"`).
    pub version: String,
    /// User-facing key the file is stored under. Serialized as
    /// `original_filename`, matching the wire format.
    pub remote_name: String,
    /// Size of the original file in bytes.
    pub total_size: u64,
    /// SHA-256 of the entire original file.
    pub file_hash: [u8; HASH_LEN],
    /// Target chunk size used when the file was split.
    pub chunk_size: u64,
    /// Target number of replicas per chunk.
    pub replication_factor: u32,
    /// Minimum replicas needed before reads are considered at risk.
    pub min_replicas_required: u32,
    /// Unix seconds when the manifest was created.
    pub created_at: i64,
    /// Unix seconds of the last read access.
    pub last_accessed: i64,
    /// Unix seconds of the last placement mutation.
    pub last_modified: i64,
    /// Unix seconds of the last integrity verification (0 = never).
    pub last_verified: i64,
    /// Free-form creator tag (defaults to the engine version string).
    pub creator_info: String,
    /// Optional user comment.
    pub comment: String,
    /// Chunk records, ordered by sequence, contiguous from 0.
    pub chunks: Vec<Chunk>,
}

impl Manifest {
    /// Create an empty manifest for a new upload.
    ///
    /// Chunks are appended as the chunker emits them; the file hash must be
    /// known up front (the chunker computes it in its first pass).
    pub fn new(
        remote_name: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
        file_hash: [u8; HASH_LEN],
        replication_factor: u32,
        min_replicas_required: u32,
    ) -> Self {
        let now = now_timestamp();
        Self {
            manifest_id: generate_manifest_id(&file_hash),
            version: MANIFEST_VERSION.to_string(),
            remote_name: remote_name.into(),
            total_size,
            file_hash,
            chunk_size,
            replication_factor,
            min_replicas_required,
            created_at: now,
            last_accessed: now,
            last_modified: now,
            last_verified: 0,
            creator_info: format!("NetChunk v{}", env!("CARGO_PKG_VERSION")),
            comment: String::new(),
            chunks: Vec::new(),
        }
    }

    /// Number of chunks.
    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Append the next chunk record.
    ///
    /// Chunks must arrive in sequence order; anything else is a caller bug
    /// surfaced as `InvalidInput`.
    pub fn add_chunk(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.sequence as usize != self.chunks.len() {
            return Err(Error::InvalidInput(format!(
                "chunk sequence {} out of order, expected {}",
                chunk.sequence,
                self.chunks.len()
            )));
        }
        self.chunks.push(chunk);
        self.last_modified = now_timestamp();
        Ok(())
    }

    /// Update timestamps after an operation.
    pub fn touch(&mut self, accessed: bool, modified: bool, verified: bool) {
        let now = now_timestamp();
        if accessed {
            self.last_accessed = now;
        }
        if modified {
            self.last_modified = now;
        }
        if verified {
            self.last_verified = now;
        }
    }

    /// Validate the locally checkable invariants.
    ///
    /// Runs after every load and before every save. Cross-server invariants
    /// (replica bytes matching the chunk hash) are the repair engine's job.
    pub fn validate(&self) -> Result<()> {
        if self.version != MANIFEST_VERSION {
            return Err(Error::ManifestCorrupt(format!(
                "unsupported manifest version '{}'",
                self.version
            )));
        }
        if self.remote_name.is_empty() {
            return Err(Error::ManifestCorrupt("empty remote name".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::ManifestCorrupt("chunk_size is zero".into()));
        }
        if self.replication_factor < 1 || self.replication_factor > MAX_REPLICAS {
            return Err(Error::ManifestCorrupt(format!(
                "replication_factor {} outside [1, {}]",
                self.replication_factor, MAX_REPLICAS
            )));
        }
        if self.min_replicas_required < 1
            || self.min_replicas_required > self.replication_factor
        {
            return Err(Error::ManifestCorrupt(format!(
                "min_replicas_required {} outside [1, {}]",
                self.min_replicas_required, self.replication_factor
            )));
        }

        let expected_chunks = if self.total_size == 0 {
            0
        } else {
            (self.total_size + self.chunk_size - 1) / self.chunk_size
        };
        if self.chunks.len() as u64 != expected_chunks {
            return Err(Error::ManifestCorrupt(format!(
                "{} chunks recorded, {} expected for {} bytes at chunk size {}",
                self.chunks.len(),
                expected_chunks,
                self.total_size,
                self.chunk_size
            )));
        }

        let mut size_sum = 0u64;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.sequence as usize != i {
                return Err(Error::ManifestCorrupt(format!(
                    "chunk at position {} has sequence {}",
                    i, chunk.sequence
                )));
            }
            if chunk.id.len() != CHUNK_ID_LEN {
                return Err(Error::ManifestCorrupt(format!(
                    "chunk {} id '{}' is not {} characters",
                    i, chunk.id, CHUNK_ID_LEN
                )));
            }
            let is_last = i + 1 == self.chunks.len();
            if chunk.size == 0 || chunk.size > self.chunk_size {
                return Err(Error::ManifestCorrupt(format!(
                    "chunk {} size {} outside [1, {}]",
                    i, chunk.size, self.chunk_size
                )));
            }
            if !is_last && chunk.size != self.chunk_size {
                return Err(Error::ManifestCorrupt(format!(
                    "non-final chunk {} has size {}, expected {}",
                    i, chunk.size, self.chunk_size
                )));
            }
            if chunk.locations.len() as u32 > MAX_REPLICAS {
                return Err(Error::ManifestCorrupt(format!(
                    "chunk {} has {} placements, max {}",
                    i,
                    chunk.locations.len(),
                    MAX_REPLICAS
                )));
            }
            size_sum += chunk.size;
        }
        if size_sum != self.total_size {
            return Err(Error::ManifestCorrupt(format!(
                "chunk sizes sum to {}, total_size is {}",
                size_sum, self.total_size
            )));
        }

        Ok(())
    }

    /// Replica statistics across all chunks.
    pub fn stats(&self) -> ManifestStats {
        let mut stats = ManifestStats {
            min_replicas: if self.chunks.is_empty() { 0 } else { u32::MAX },
            ..ManifestStats::default()
        };

        for chunk in &self.chunks {
            let replicas = chunk.replica_count() as u32;
            if replicas > 0 {
                stats.chunks_stored += 1;
            } else {
                stats.missing_chunks += 1;
            }
            stats.total_chunk_bytes += chunk.size;
            stats.min_replicas = stats.min_replicas.min(replicas);
        }

        if !self.chunks.is_empty() {
            let total: u32 = self.chunks.iter().map(|c| c.replica_count() as u32).sum();
            stats.avg_replicas = total as f64 / self.chunks.len() as f64;
        }

        stats
    }

    /// Sequence numbers of chunks with fewer than `min` replicas.
    pub fn under_replicated(&self, min: u32) -> Vec<u32> {
        self.chunks
            .iter()
            .filter(|c| (c.replica_count() as u32) < min)
            .map(|c| c.sequence)
            .collect()
    }

    /// The file hash as lowercase hex.
    pub fn file_hash_hex(&self) -> String {
        digest_to_hex(&self.file_hash)
    }
}

/// Replica statistics for one manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestStats {
    /// Chunks with at least one replica.
    pub chunks_stored: u32,
    /// Chunks with no replica at all.
    pub missing_chunks: u32,
    /// Sum of chunk payload sizes.
    pub total_chunk_bytes: u64,
    /// Mean replicas per chunk.
    pub avg_replicas: f64,
    /// Fewest replicas on any chunk (0 for an empty manifest).
    pub min_replicas: u32,
}

/// Generate a manifest id: `manifest_` + file-hash prefix + 12 random bytes,
/// hex-grouped for readability.
pub fn generate_manifest_id(file_hash: &[u8; HASH_LEN]) -> String {
    use rand::RngCore;

    let mut random = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut random);

    format!(
        "manifest_{}_{}_{}_{}",
        hex::encode(&file_hash[..4]),
        hex::encode(&random[0..4]),
        hex::encode(&random[4..8]),
        hex::encode(&random[8..12]),
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    fn chunk_with(sequence: u32, size: u64, replicas: &[&str]) -> Chunk {
        let mut chunk = Chunk::new(
            format!("{:08x}{}", sequence, "a".repeat(CHUNK_ID_LEN - 8)),
            sequence,
            size,
            sha256(&sequence.to_be_bytes()),
        );
        for server in replicas {
            chunk
                .add_location(Placement::new(*server, format!("/chunks/x/{}", sequence)))
                .unwrap();
        }
        chunk
    }

    fn sample_manifest() -> Manifest {
        let mut manifest = Manifest::new("report.pdf", 2 * 1024 + 100, 1024, sha256(b"file"), 2, 1);
        manifest.add_chunk(chunk_with(0, 1024, &["alpha", "beta"])).unwrap();
        manifest.add_chunk(chunk_with(1, 1024, &["beta", "gamma"])).unwrap();
        manifest.add_chunk(chunk_with(2, 100, &["alpha"])).unwrap();
        manifest
    }

    #[test]
    fn test_valid_manifest_passes_validation() {
        sample_manifest().validate().unwrap();
    }

    #[test]
    fn test_empty_file_manifest_is_valid() {
        let manifest = Manifest::new("empty.bin", 0, 4 * 1024 * 1024, sha256(b""), 3, 1);
        assert_eq!(manifest.chunk_count(), 0);
        manifest.validate().unwrap();
    }

    #[test]
    fn test_out_of_order_chunk_rejected() {
        let mut manifest = Manifest::new("f", 2048, 1024, sha256(b"f"), 2, 1);
        let err = manifest.add_chunk(chunk_with(1, 1024, &[])).unwrap_err();
        assert_eq!(err.short_str(), "invalid input");
    }

    #[test]
    fn test_validation_rejects_wrong_chunk_count() {
        let mut manifest = sample_manifest();
        manifest.chunks.pop();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_short_middle_chunk() {
        let mut manifest = sample_manifest();
        manifest.chunks[1].size = 512;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_replication_bounds() {
        let mut manifest = sample_manifest();
        manifest.replication_factor = 0;
        assert!(manifest.validate().is_err());

        let mut manifest = sample_manifest();
        manifest.min_replicas_required = manifest.replication_factor + 1;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_chunk_id_width() {
        let mut manifest = sample_manifest();
        manifest.chunks[0].id = "tooshort".into();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_duplicate_location_rejected() {
        let mut chunk = chunk_with(0, 10, &["alpha"]);
        let err = chunk.add_location(Placement::new("alpha", "/p")).unwrap_err();
        assert_eq!(err.short_str(), "invalid input");
    }

    #[test]
    fn test_remove_location() {
        let mut chunk = chunk_with(0, 10, &["alpha", "beta"]);
        assert!(chunk.remove_location("alpha"));
        assert!(!chunk.remove_location("alpha"));
        assert_eq!(chunk.placed_servers(), vec!["beta".to_string()]);
    }

    #[test]
    fn test_stats_and_under_replication() {
        let manifest = sample_manifest();
        let stats = manifest.stats();
        assert_eq!(stats.chunks_stored, 3);
        assert_eq!(stats.missing_chunks, 0);
        assert_eq!(stats.min_replicas, 1);
        assert!((stats.avg_replicas - 5.0 / 3.0).abs() < 1e-9);

        assert_eq!(manifest.under_replicated(2), vec![2]);
        assert!(manifest.under_replicated(1).is_empty());
    }

    #[test]
    fn test_manifest_id_format() {
        let id = generate_manifest_id(&sha256(b"data"));
        assert!(id.starts_with("manifest_"));
        // "manifest_" + 8 hex + "_" + 8 hex + "_" + 8 hex + "_" + 8 hex
        assert_eq!(id.len(), 9 + 8 + 1 + 8 + 1 + 8 + 1 + 8);
    }

    #[test]
    fn test_manifest_ids_are_unique() {
        let hash = sha256(b"same file");
        assert_ne!(generate_manifest_id(&hash), generate_manifest_id(&hash));
    }
}
