//! Streaming SHA-256 and the digest hex codec.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// SHA-256 digest length in bytes.
pub const HASH_LEN: usize = 32;

/// SHA-256 digest length in lowercase hex characters.
pub const HASH_HEX_LEN: usize = 2 * HASH_LEN;

/// Block size for the file-hashing helper (8 KiB).
const FILE_READ_BLOCK: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// Streaming hasher
// ---------------------------------------------------------------------------

/// Incremental SHA-256: `new → update(bytes)* → finalize`.
///
/// Used by the chunker to feed the whole-file digest and the per-chunk
/// digest from the same read pass.
#[derive(Clone)]
pub struct StreamingHasher {
    inner: Sha256,
}

impl StreamingHasher {
    /// Start a fresh digest.
    pub fn new() -> Self {
        Self { inner: Sha256::new() }
    }

    /// Absorb the next byte range.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Consume the hasher and produce the 32-byte digest.
    pub fn finalize(self) -> [u8; HASH_LEN] {
        self.inner.finalize().into()
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// One-shot helpers
// ---------------------------------------------------------------------------

/// SHA-256 of a byte slice.
pub fn sha256(data: &[u8]) -> [u8; HASH_LEN] {
    Sha256::digest(data).into()
}

/// SHA-256 of a file's full contents, streamed in 8 KiB blocks.
pub fn sha256_file(path: &Path) -> Result<[u8; HASH_LEN]> {
    let mut file = File::open(path)?;
    let mut hasher = StreamingHasher::new();
    let mut block = [0u8; FILE_READ_BLOCK];

    loop {
        let read = file.read(&mut block)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }

    Ok(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Hex codec
// ---------------------------------------------------------------------------

/// Encode a digest as lowercase hex (always `HASH_HEX_LEN` characters).
pub fn digest_to_hex(digest: &[u8; HASH_LEN]) -> String {
    hex::encode(digest)
}

/// Decode a lowercase-hex digest.
///
/// Fails with `InvalidInput` on wrong length or non-hex characters.
pub fn digest_from_hex(hex_str: &str) -> Result<[u8; HASH_LEN]> {
    if hex_str.len() != HASH_HEX_LEN {
        return Err(Error::InvalidInput(format!(
            "digest hex must be {} characters, got {}",
            HASH_HEX_LEN,
            hex_str.len()
        )));
    }

    let bytes = hex::decode(hex_str)
        .map_err(|e| Error::InvalidInput(format!("bad digest hex: {}", e)))?;

    let mut digest = [0u8; HASH_LEN];
    digest.copy_from_slice(&bytes);
    Ok(digest)
}

/// Constant-time digest equality.
///
/// Folds the XOR of every byte pair so the comparison does not short-circuit
/// on the first mismatch.
pub fn digests_equal(a: &[u8; HASH_LEN], b: &[u8; HASH_LEN]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
