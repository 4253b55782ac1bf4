//! # File Chunking
//!
//! Splits a local file into an ordered, lazy sequence of fixed-size chunks
//! for placement on remote servers.
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         FILE CHUNKING                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Pass 1: stream the whole file → file_hash (SHA-256)                   │
//! │          The manifest needs the file hash before any chunk is placed.  │
//! │                                                                         │
//! │  Pass 2: read up to chunk_size bytes at a time                         │
//! │          ├── size      = bytes read (last chunk may be short)          │
//! │          ├── sequence  = running counter from 0                        │
//! │          ├── hash      = SHA-256 of the payload                        │
//! │          └── id        = sequence (8 hex) ++ file-hash prefix (4 hex)  │
//! │                          ++ 4 random bytes (8 hex)                     │
//! │                                                                         │
//! │  The sequence is finite and non-restartable; exhaustion is signalled   │
//! │  with `ChunkerExhausted`, never with a not-found error.                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::crypto::{sha256, sha256_file, HASH_LEN};
use crate::error::{Error, Result};
use crate::manifest::Chunk;

/// Smallest allowed chunk size: 1 MiB.
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;

/// Largest allowed chunk size: 64 MiB.
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A chunk record together with its in-flight payload.
///
/// The payload exists only while the chunk is being placed or verified;
/// manifests never store it.
#[derive(Debug, Clone)]
pub struct ChunkData {
    /// The metadata that ends up in the manifest.
    pub record: Chunk,
    /// The raw chunk bytes.
    pub payload: Bytes,
}

/// Non-blocking progress snapshot for a chunking run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerProgress {
    /// Chunks emitted so far.
    pub chunks_emitted: u32,
    /// Total chunks this file will produce.
    pub chunk_count: u32,
    /// Payload bytes emitted so far.
    pub bytes_emitted: u64,
    /// Total file size in bytes.
    pub total_size: u64,
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Streaming chunker over one local file.
#[derive(Debug)]
pub struct FileChunker {
    path: PathBuf,
    file: File,
    chunk_size: u64,
    total_size: u64,
    chunk_count: u32,
    file_hash: [u8; HASH_LEN],
    next_sequence: u32,
    bytes_emitted: u64,
    finished: bool,
}

impl FileChunker {
    /// Open `path` for chunking at `chunk_size` bytes per chunk.
    ///
    /// Streams the file once up front to compute the whole-file SHA-256,
    /// then positions a second handle at the start for chunk emission.
    pub fn open(path: impl AsRef<Path>, chunk_size: u64) -> Result<Self> {
        let path = path.as_ref();

        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(Error::InvalidInput(format!(
                "chunk size {} outside [{}, {}]",
                chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            )));
        }

        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(Error::InvalidInput(format!(
                "'{}' is not a regular file",
                path.display()
            )));
        }
        let total_size = metadata.len();

        let file_hash = sha256_file(path)?;
        let file = File::open(path)?;

        let chunk_count = chunk_count_for(total_size, chunk_size);
        debug!(
            path = %path.display(),
            total_size,
            chunk_size,
            chunk_count,
            "chunker opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            chunk_size,
            total_size,
            chunk_count,
            file_hash,
            next_sequence: 0,
            bytes_emitted: 0,
            finished: total_size == 0,
        })
    }

    /// SHA-256 of the whole file, available before any chunk is emitted.
    pub fn file_hash(&self) -> [u8; HASH_LEN] {
        self.file_hash
    }

    /// Total file size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of chunks this file will produce.
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// The chunk size this run was opened with.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// The path being chunked.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether another chunk is available.
    pub fn has_next(&self) -> bool {
        !self.finished
    }

    /// Emit the next chunk in sequence order.
    ///
    /// Returns `ChunkerExhausted` after the final chunk; further calls keep
    /// returning it. Read failures surface as `Io` and leave the chunker
    /// finished (the sequence is not restartable).
    pub fn next_chunk(&mut self) -> Result<ChunkData> {
        if self.finished {
            return Err(Error::ChunkerExhausted);
        }

        let mut payload = vec![0u8; self.chunk_size as usize];
        let mut filled = 0usize;

        while filled < payload.len() {
            let read = match self.file.read(&mut payload[filled..]) {
                Ok(n) => n,
                Err(e) => {
                    self.finished = true;
                    return Err(e.into());
                }
            };
            if read == 0 {
                break;
            }
            filled += read;
        }

        if filled == 0 {
            self.finished = true;
            return Err(Error::ChunkerExhausted);
        }
        payload.truncate(filled);

        let sequence = self.next_sequence;
        let record = Chunk::new(
            generate_chunk_id(sequence, &self.file_hash),
            sequence,
            filled as u64,
            sha256(&payload),
        );

        self.next_sequence += 1;
        self.bytes_emitted += filled as u64;
        if self.bytes_emitted >= self.total_size {
            self.finished = true;
        }

        Ok(ChunkData { record, payload: Bytes::from(payload) })
    }

    /// Current progress. Callable at any point, including after exhaustion.
    pub fn progress(&self) -> ChunkerProgress {
        ChunkerProgress {
            chunks_emitted: self.next_sequence,
            chunk_count: self.chunk_count,
            bytes_emitted: self.bytes_emitted,
            total_size: self.total_size,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Number of chunks a file of `file_size` produces at `chunk_size`.
pub fn chunk_count_for(file_size: u64, chunk_size: u64) -> u32 {
    if file_size == 0 || chunk_size == 0 {
        return 0;
    }
    ((file_size + chunk_size - 1) / chunk_size) as u32
}

/// Generate a 20-hex-character chunk id.
///
/// Layout: `sequence (8 hex) ++ file-hash prefix (4 hex) ++ 4 random bytes
/// (8 hex)`. The sequence prefix keeps ids sortable within a manifest; the
/// random tail keeps re-uploads from colliding.
pub fn generate_chunk_id(sequence: u32, file_hash: &[u8; HASH_LEN]) -> String {
    use rand::RngCore;

    let mut random = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut random);

    format!(
        "{:08x}{}{}",
        sequence,
        hex::encode(&file_hash[..2]),
        hex::encode(random)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::CHUNK_ID_LEN;
    use std::io::Write;

    fn temp_file(data: &[u8]) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    fn drain(chunker: &mut FileChunker) -> Vec<ChunkData> {
        let mut chunks = Vec::new();
        loop {
            match chunker.next_chunk() {
                Ok(chunk) => chunks.push(chunk),
                Err(Error::ChunkerExhausted) => break,
                Err(e) => panic!("unexpected chunker error: {}", e),
            }
        }
        chunks
    }

    #[test]
    fn test_partition_law() {
        // 2.5 MiB of 0xA5 at 1 MiB chunks → 1 MiB, 1 MiB, 0.5 MiB
        let data = vec![0xA5u8; 5 * 512 * 1024];
        let tmp = temp_file(&data);

        let mut chunker = FileChunker::open(tmp.path(), MIN_CHUNK_SIZE).unwrap();
        assert_eq!(chunker.chunk_count(), 3);

        let chunks = drain(&mut chunker);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].payload.len() as u64, MIN_CHUNK_SIZE);
        assert_eq!(chunks[1].payload.len() as u64, MIN_CHUNK_SIZE);
        assert_eq!(chunks[2].payload.len() as u64, MIN_CHUNK_SIZE / 2);

        let mut reassembled = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.record.sequence as usize, i);
            assert_eq!(chunk.record.size, chunk.payload.len() as u64);
            reassembled.extend_from_slice(&chunk.payload);
        }
        assert_eq!(reassembled, data);
    }

    #[test]
    fn test_chunk_hashes_match_payload() {
        let data: Vec<u8> = (0..1024u32 * 1200).map(|i| (i % 251) as u8).collect();
        let tmp = temp_file(&data);

        let mut chunker = FileChunker::open(tmp.path(), MIN_CHUNK_SIZE).unwrap();
        let file_hash = chunker.file_hash();
        assert_eq!(file_hash, sha256(&data));

        for chunk in drain(&mut chunker) {
            assert_eq!(chunk.record.hash, sha256(&chunk.payload));
        }
    }

    #[test]
    fn test_exact_multiple_of_chunk_size() {
        let data = vec![0x42u8; 2 * MIN_CHUNK_SIZE as usize];
        let tmp = temp_file(&data);

        let mut chunker = FileChunker::open(tmp.path(), MIN_CHUNK_SIZE).unwrap();
        assert_eq!(chunker.chunk_count(), 2);

        let chunks = drain(&mut chunker);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].payload.len() as u64, MIN_CHUNK_SIZE);
    }

    #[test]
    fn test_single_byte_file() {
        let tmp = temp_file(b"x");
        let mut chunker = FileChunker::open(tmp.path(), MIN_CHUNK_SIZE).unwrap();
        assert_eq!(chunker.chunk_count(), 1);

        let chunks = drain(&mut chunker);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].record.size, 1);
    }

    #[test]
    fn test_empty_file_emits_nothing() {
        let tmp = temp_file(b"");
        let mut chunker = FileChunker::open(tmp.path(), DEFAULT_CHUNK_SIZE).unwrap();

        assert_eq!(chunker.chunk_count(), 0);
        assert!(!chunker.has_next());
        assert_eq!(chunker.file_hash(), sha256(b""));
        assert!(matches!(chunker.next_chunk(), Err(Error::ChunkerExhausted)));
    }

    #[test]
    fn test_exhaustion_is_idempotent() {
        let tmp = temp_file(b"data");
        let mut chunker = FileChunker::open(tmp.path(), MIN_CHUNK_SIZE).unwrap();
        drain(&mut chunker);

        for _ in 0..3 {
            assert!(matches!(chunker.next_chunk(), Err(Error::ChunkerExhausted)));
        }
        assert!(!chunker.has_next());
    }

    #[test]
    fn test_progress_tracking() {
        let data = vec![0u8; MIN_CHUNK_SIZE as usize + 100];
        let tmp = temp_file(&data);
        let mut chunker = FileChunker::open(tmp.path(), MIN_CHUNK_SIZE).unwrap();

        let p = chunker.progress();
        assert_eq!(p.chunks_emitted, 0);
        assert_eq!(p.chunk_count, 2);
        assert_eq!(p.total_size, data.len() as u64);

        chunker.next_chunk().unwrap();
        assert_eq!(chunker.progress().chunks_emitted, 1);
        assert_eq!(chunker.progress().bytes_emitted, MIN_CHUNK_SIZE);

        drain(&mut chunker);
        let p = chunker.progress();
        assert_eq!(p.chunks_emitted, 2);
        assert_eq!(p.bytes_emitted, p.total_size);
    }

    #[test]
    fn test_out_of_range_chunk_size_rejected() {
        let tmp = temp_file(b"data");
        assert!(FileChunker::open(tmp.path(), MIN_CHUNK_SIZE - 1).is_err());
        assert!(FileChunker::open(tmp.path(), MAX_CHUNK_SIZE + 1).is_err());
        assert!(FileChunker::open(tmp.path(), 0).is_err());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = FileChunker::open("/nonexistent/netchunk-input", MIN_CHUNK_SIZE).unwrap_err();
        assert_eq!(err.short_str(), "not found");
    }

    #[test]
    fn test_chunk_id_width_and_prefix() {
        let file_hash = sha256(b"some file");
        let id = generate_chunk_id(7, &file_hash);

        assert_eq!(id.len(), CHUNK_ID_LEN);
        assert!(id.starts_with("00000007"));
        assert_eq!(&id[8..12], hex::encode(&file_hash[..2]));
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_chunk_ids_are_unique_per_call() {
        let file_hash = sha256(b"f");
        assert_ne!(generate_chunk_id(0, &file_hash), generate_chunk_id(0, &file_hash));
    }

    #[test]
    fn test_chunk_count_for() {
        assert_eq!(chunk_count_for(0, MIN_CHUNK_SIZE), 0);
        assert_eq!(chunk_count_for(1, MIN_CHUNK_SIZE), 1);
        assert_eq!(chunk_count_for(MIN_CHUNK_SIZE, MIN_CHUNK_SIZE), 1);
        assert_eq!(chunk_count_for(MIN_CHUNK_SIZE + 1, MIN_CHUNK_SIZE), 2);
    }
}
