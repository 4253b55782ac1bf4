//! # NetChunk Core
//!
//! A personal-scale distributed file storage engine: it turns a
//! heterogeneous set of commodity storage servers into a single reliable
//! object store by splitting each file into fixed-size chunks, replicating
//! every chunk across several servers, and recording the placement in a
//! JSON manifest.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        NETCHUNK CORE MODULES                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │   Crypto    │  │   Chunker   │  │  Manifest   │  │   Placement  │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - SHA-256   │  │ - Split     │  │ - Model     │  │ - Ranking    │   │
//! │  │ - Hex codec │  │ - File hash │  │ - JSON      │  │ - Spreading  │   │
//! │  │ - CT equal  │  │ - Chunk ids │  │ - Backups   │  │ - Demotion   │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘   │
//! │         │                │                │                │           │
//! │         └────────────────┴────────┬───────┴────────────────┘           │
//! │                                   │                                     │
//! │  ┌─────────────┐  ┌───────────────┴─────────────────────────────────┐  │
//! │  │   Health    │  │                  Engine                         │  │
//! │  │             │  │                                                 │  │
//! │  │ - Probing   │◄─┤  upload · download · list · delete · verify    │  │
//! │  │ - Snapshot  │  │                                                 │  │
//! │  └─────────────┘  │  ┌───────────┐   every remote byte goes        │  │
//! │                   │  │  Repair   │   through the BlobStore         │  │
//! │  ┌─────────────┐  │  │           │   capability (put/get/delete/   │  │
//! │  │  Transport  │◄─┴──┤ - Classify│   stat/list/mkdir/ping)         │  │
//! │  │  (BlobStore)│     │ - Restore │                                 │  │
//! │  └─────────────┘     │ - Balance │                                 │  │
//! │                      └───────────┘                                 │  │
//! │                      └─────────────────────────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire engine
//! - [`crypto`] - Content addressing (SHA-256, hex codec)
//! - [`chunker`] - Streaming file splitter
//! - [`manifest`] - The file index: model, JSON codec, local store
//! - [`placement`] - Pure replica-placement policy
//! - [`transport`] - The BlobStore capability and bundled adapters
//! - [`health`] - Server probing and availability snapshots
//! - [`engine`] - Operation orchestration (upload, download, ...)
//! - [`repair`] - Integrity verification, repair, and rebalancing
//!
//! ## Durability Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DURABILITY LAYERS                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Layer 1: Content addressing                                           │
//! │  ───────────────────────────                                            │
//! │  Every chunk and every file carries its SHA-256. A replica is only    │
//! │  trusted after its bytes re-hash to the recorded digest.              │
//! │                                                                         │
//! │  Layer 2: Replication                                                  │
//! │  ────────────────────                                                   │
//! │  Each chunk is placed on `replication_factor` distinct servers.       │
//! │  Downloads fall back replica by replica; one survivor is enough.      │
//! │                                                                         │
//! │  Layer 3: Repair                                                       │
//! │  ───────────────                                                        │
//! │  Verify passes classify every chunk (Healthy / Degraded / Critical /  │
//! │  Lost), delete corrupt replicas, and re-replicate from survivors      │
//! │  until the target factor holds again.                                 │
//! │                                                                         │
//! │  Layer 4: Manifest redundancy                                          │
//! │  ────────────────────────────                                           │
//! │  The manifest itself is written to every server and cached locally    │
//! │  with atomic writes and timestamped backups.                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod chunker;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod health;
pub mod manifest;
pub mod placement;
pub mod repair;
pub mod transport;
/// Clock helpers for manifest and placement timestamps.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{Config, ServerConfig};
pub use engine::{CancelToken, Engine, OpStats, ProgressFn, ProgressUpdate};
pub use error::{Error, Result};
pub use manifest::{Chunk, Manifest, Placement};
pub use repair::{ChunkHealth, RepairMode, RepairStats, SystemHealth};
pub use transport::{BlobStore, DirBlobStore, MemoryBlobStore};
