//! # Error Handling
//!
//! This module provides the error types for the NetChunk storage engine.
//!
//! ## Error Taxonomy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR TAXONOMY                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Input                                                             │
//! │  │   └── InvalidInput        - Argument outside its documented range   │
//! │  │                                                                      │
//! │  ├── Local                                                             │
//! │  │   ├── Io                  - Local filesystem failure                │
//! │  │   └── NotFound            - Manifest or payload absent              │
//! │  │                                                                      │
//! │  ├── Remote                                                            │
//! │  │   ├── Transport           - BlobStore failure after retries        │
//! │  │   └── InsufficientServers - Placement could not reach one replica  │
//! │  │                                                                      │
//! │  ├── Operations                                                        │
//! │  │   ├── UploadFailed        - Upload abandoned after retries         │
//! │  │   └── DownloadFailed      - Every replica of some chunk failed     │
//! │  │                                                                      │
//! │  ├── Integrity                                                         │
//! │  │   ├── ChunkIntegrity      - Hash mismatch on payload or file       │
//! │  │   └── ManifestCorrupt     - Schema or invariant violation on parse │
//! │  │                                                                      │
//! │  └── Control                                                           │
//! │      ├── Cancelled           - User cancel or deadline exceeded       │
//! │      └── ChunkerExhausted    - Chunker end-of-sequence (not an error  │
//! │                                condition; distinct from NotFound)     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant has a stable short string (printed verbatim by the CLI)
//! and a numeric code grouped by category.

use thiserror::Error;

/// Result type alias for NetChunk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the NetChunk storage engine
///
/// All errors are categorized by layer to make error handling clearer
/// and to keep user-visible messages stable across versions.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Input Errors (100-199)
    // ========================================================================

    /// An argument was outside its documented range
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // Local Errors (200-299)
    // ========================================================================

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Manifest or chunk payload absent where expected
    #[error("Not found: {0}")]
    NotFound(String),

    // ========================================================================
    // Remote Errors (300-399)
    // ========================================================================

    /// BlobStore-layer failure after retries (network, auth, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Placement could not reach at least one replica, or fewer servers
    /// than the replication factor are configured
    #[error("Insufficient servers: {0}")]
    InsufficientServers(String),

    // ========================================================================
    // Operation Errors (400-499)
    // ========================================================================

    /// Upload abandoned after retries and fallbacks
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Download abandoned: every replica of some chunk failed
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    // ========================================================================
    // Integrity Errors (500-599)
    // ========================================================================

    /// Hash mismatch on a chunk payload or on full-file verification
    #[error("Chunk integrity error: {0}")]
    ChunkIntegrity(String),

    /// Schema or invariant violation while parsing a manifest
    #[error("Manifest corrupt: {0}")]
    ManifestCorrupt(String),

    // ========================================================================
    // Control Errors (600-699)
    // ========================================================================

    /// Operation cancelled by the user or a deadline was exceeded
    #[error("Operation cancelled")]
    Cancelled,

    /// The chunker has emitted its final chunk.
    ///
    /// This is a terminal-state signal, not a failure. It is a distinct
    /// kind so callers never confuse end-of-sequence with a missing file.
    #[error("No more chunks")]
    ChunkerExhausted,
}

impl Error {
    /// Get the numeric error code
    ///
    /// Codes are organized by category:
    /// - 100-199: Input
    /// - 200-299: Local filesystem
    /// - 300-399: Remote transport / placement
    /// - 400-499: Operations
    /// - 500-599: Integrity
    /// - 600-699: Control flow
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidInput(_) => 100,
            Error::Io(_) => 200,
            Error::NotFound(_) => 201,
            Error::Transport(_) => 300,
            Error::InsufficientServers(_) => 301,
            Error::UploadFailed(_) => 400,
            Error::DownloadFailed(_) => 401,
            Error::ChunkIntegrity(_) => 500,
            Error::ManifestCorrupt(_) => 501,
            Error::Cancelled => 600,
            Error::ChunkerExhausted => 601,
        }
    }

    /// The stable short name for this error kind.
    ///
    /// The CLI prints this verbatim; it never changes across versions.
    pub fn short_str(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid input",
            Error::Io(_) => "io error",
            Error::NotFound(_) => "not found",
            Error::Transport(_) => "transport error",
            Error::InsufficientServers(_) => "insufficient servers",
            Error::UploadFailed(_) => "upload failed",
            Error::DownloadFailed(_) => "download failed",
            Error::ChunkIntegrity(_) => "chunk integrity error",
            Error::ManifestCorrupt(_) => "manifest corrupt",
            Error::Cancelled => "cancelled",
            Error::ChunkerExhausted => "exhausted",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can potentially be resolved by retrying or by
    /// falling back to another replica/server.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::ChunkIntegrity(_))
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(err.to_string()),
            _ => Error::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ManifestCorrupt(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidInput("x".into()).code(), 100);
        assert_eq!(Error::Io("x".into()).code(), 200);
        assert_eq!(Error::NotFound("x".into()).code(), 201);
        assert_eq!(Error::Transport("x".into()).code(), 300);
        assert_eq!(Error::InsufficientServers("x".into()).code(), 301);
        assert_eq!(Error::UploadFailed("x".into()).code(), 400);
        assert_eq!(Error::DownloadFailed("x".into()).code(), 401);
        assert_eq!(Error::ChunkIntegrity("x".into()).code(), 500);
        assert_eq!(Error::ManifestCorrupt("x".into()).code(), 501);
        assert_eq!(Error::Cancelled.code(), 600);
        assert_eq!(Error::ChunkerExhausted.code(), 601);
    }

    #[test]
    fn test_short_strings_are_stable() {
        assert_eq!(Error::Transport("dial".into()).short_str(), "transport error");
        assert_eq!(Error::ChunkerExhausted.short_str(), "exhausted");
        assert_eq!(Error::Cancelled.short_str(), "cancelled");
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::Transport("timeout".into()).is_recoverable());
        assert!(Error::ChunkIntegrity("bad hash".into()).is_recoverable());
        assert!(!Error::InvalidInput("x".into()).is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(Error::from(err).code(), 201);

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(Error::from(err).code(), 200);
    }

    #[test]
    fn test_exhaustion_is_not_not_found() {
        assert_ne!(Error::ChunkerExhausted.code(), Error::NotFound("x".into()).code());
    }
}
