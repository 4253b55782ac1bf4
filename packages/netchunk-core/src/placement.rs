//! # Replica Placement
//!
//! Decides which servers receive the next replica of a chunk. The policy
//! is pure — no I/O, no internal state — so it is trivially testable and
//! deterministic given its inputs:
//!
//! 1. Servers already holding this chunk are excluded.
//! 2. Remaining servers are ranked by ascending chunk count carried for
//!    this manifest, ties broken by configured priority descending, then
//!    id ascending. This spreads a file's chunks evenly.
//! 3. Servers whose last health probe marked them unavailable are moved to
//!    the tail rather than removed, so a recovering server is still tried
//!    as a last resort.

use std::collections::{HashMap, HashSet};

/// Read-only view of one server for a placement decision.
///
/// Built from the configuration plus the latest health snapshot; the
/// engine hands one slice per decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSnapshot {
    /// Configured server id.
    pub id: String,
    /// Configured priority; higher wins ties.
    pub priority: i32,
    /// Whether the last health probe saw the server respond.
    pub available: bool,
}

impl ServerSnapshot {
    /// Snapshot with the given id, priority 0, available.
    pub fn available(id: impl Into<String>) -> Self {
        Self { id: id.into(), priority: 0, available: true }
    }
}

/// Rank candidate servers for the next replica of one chunk.
///
/// `load` counts the chunks of the current manifest already carried per
/// server; `exclude` holds the servers that already have this chunk.
/// Returns server ids best-first.
pub fn rank_candidates(
    servers: &[ServerSnapshot],
    load: &HashMap<String, u32>,
    exclude: &HashSet<String>,
) -> Vec<String> {
    let mut preferred: Vec<&ServerSnapshot> = Vec::new();
    let mut demoted: Vec<&ServerSnapshot> = Vec::new();

    for server in servers {
        if exclude.contains(&server.id) {
            continue;
        }
        if server.available {
            preferred.push(server);
        } else {
            demoted.push(server);
        }
    }

    let key = |server: &ServerSnapshot| {
        (
            load.get(&server.id).copied().unwrap_or(0),
            std::cmp::Reverse(server.priority),
            server.id.clone(),
        )
    };
    preferred.sort_by_key(|s| key(s));
    demoted.sort_by_key(|s| key(s));

    preferred
        .into_iter()
        .chain(demoted)
        .map(|s| s.id.clone())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
