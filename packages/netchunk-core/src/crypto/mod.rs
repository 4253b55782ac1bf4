//! # Crypto Module
//!
//! Content addressing primitives for NetChunk: streaming SHA-256 over byte
//! ranges and whole files, a hex codec for digests, and constant-time
//! digest comparison.
//!
//! Chunk payloads are addressed by the SHA-256 of their exact bytes; the
//! whole original file is addressed by a second digest over its full
//! contents. Both digests live in the manifest and are the sole integrity
//! authority for downloads and repair.

mod hashing;

pub use hashing::{
    digest_from_hex, digest_to_hex, digests_equal, sha256, sha256_file, StreamingHasher,
    HASH_HEX_LEN, HASH_LEN,
};
