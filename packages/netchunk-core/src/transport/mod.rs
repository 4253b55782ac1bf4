//! # Transport Module
//!
//! The engine talks to remote servers through one capability: the
//! [`BlobStore`] trait — put / get / delete / stat / list / mkdir / ping
//! over named byte objects on a named server. Everything transport-specific
//! (FTP, pooling, auth) lives behind it.
//!
//! ## Contract
//!
//! - Every operation takes a deadline. A deadline that elapses inside one
//!   call surfaces as `Transport` (retryable); `Cancelled` is reserved for
//!   the caller's cancel signal.
//! - `put` overwrites; `delete` of a missing object is success. The engine
//!   relies on both for idempotent retries.
//! - Implementations may be multi-threaded underneath; each call is an
//!   independent suspension point for the engine.
//!
//! ## Remote object layout
//!
//! ```text
//! <base>/chunks/<manifest_id>/<sequence:08x>_<chunk_id>.chunk
//! <base>/manifests/<remote_name>.netchunk
//! ```
//!
//! Both paths are pure functions of their inputs, so a download can locate
//! every object without a directory scan.
//!
//! Implementations shipped here:
//! - [`MemoryBlobStore`] - in-memory fake with fault injection, for tests
//! - [`DirBlobStore`] - local-directory adapter, one subdirectory per server

mod localdir;
mod memory;

pub use localdir::DirBlobStore;
pub use memory::MemoryBlobStore;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::manifest::MANIFEST_EXTENSION;

/// Default per-call deadline used when a caller has no stronger opinion.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

// ============================================================================
// BLOBSTORE CAPABILITY
// ============================================================================

/// Result of a `stat` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobStat {
    /// Whether the object exists.
    pub exists: bool,
    /// Object size in bytes (0 when absent).
    pub size: u64,
}

/// The transport capability the storage engine depends on.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` at `remote_path` on `server_id`, overwriting.
    async fn put(
        &self,
        server_id: &str,
        remote_path: &str,
        data: Bytes,
        deadline: Duration,
    ) -> Result<()>;

    /// Fetch the object at `remote_path` on `server_id`.
    async fn get(&self, server_id: &str, remote_path: &str, deadline: Duration) -> Result<Bytes>;

    /// Delete the object at `remote_path`. Missing objects are success.
    async fn delete(&self, server_id: &str, remote_path: &str, deadline: Duration) -> Result<()>;

    /// Existence and size of the object at `remote_path`.
    async fn stat(&self, server_id: &str, remote_path: &str, deadline: Duration)
        -> Result<BlobStat>;

    /// Names of the objects directly inside `remote_dir`.
    async fn list(
        &self,
        server_id: &str,
        remote_dir: &str,
        deadline: Duration,
    ) -> Result<Vec<String>>;

    /// Create `remote_path` (and parents) as a directory.
    async fn mkdir(&self, server_id: &str, remote_path: &str, deadline: Duration) -> Result<()>;

    /// Liveness probe. Returns measured latency in milliseconds.
    async fn ping(&self, server_id: &str, deadline: Duration) -> Result<f64>;
}

// ============================================================================
// REMOTE OBJECT LAYOUT
// ============================================================================

/// Directory holding all chunk objects for one manifest.
pub fn chunk_dir(base: &str, manifest_id: &str) -> String {
    format!("{}/chunks/{}", base.trim_end_matches('/'), manifest_id)
}

/// Path of one chunk replica object.
pub fn chunk_path(base: &str, manifest_id: &str, sequence: u32, chunk_id: &str) -> String {
    format!(
        "{}/{:08x}_{}.chunk",
        chunk_dir(base, manifest_id),
        sequence,
        chunk_id
    )
}

/// Directory holding manifest objects on a server.
pub fn manifest_dir(base: &str) -> String {
    format!("{}/manifests", base.trim_end_matches('/'))
}

/// Path of the manifest object for `remote_name`.
pub fn manifest_path(base: &str, remote_name: &str) -> String {
    format!("{}/{}{}", manifest_dir(base), remote_name, MANIFEST_EXTENSION)
}

/// Recover the remote name from a manifest object filename, if it is one.
pub fn remote_name_from_manifest_object(object_name: &str) -> Option<&str> {
    object_name.strip_suffix(MANIFEST_EXTENSION)
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Exponential backoff schedule for BlobStore calls.
///
/// Attempt `n` (0-based) sleeps `base * 2^n` before retrying, capped at
/// `max_delay`. Only the final failure is surfaced to callers.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy with the given attempt budget and the standard backoff curve
    /// (1 s base, doubling, 8 s cap).
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }

    /// Delay to sleep after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_attempts(3)
    }
}

// ============================================================================
// TESTS
// ============================================================================
