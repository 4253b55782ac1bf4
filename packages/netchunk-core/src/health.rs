//! Server health probing and the availability snapshot the placer reads.
//!
//! A probe pass pings every enabled server and records status, latency,
//! and the probe time. The result is an immutable snapshot; the placer
//! reads one snapshot per placement decision, so a probe running
//! concurrently never flips availability mid-decision.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Config;
use crate::placement::ServerSnapshot;
use crate::time::now_timestamp;
use crate::transport::BlobStore;

/// Probe outcome for one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Never probed.
    Unknown,
    /// Last probe succeeded.
    Available,
    /// Last probe failed.
    Unavailable,
}

/// Health record for one server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerHealth {
    /// Configured server id.
    pub id: String,
    /// Last probe outcome.
    pub status: ServerStatus,
    /// Measured ping latency, when available.
    pub latency_ms: Option<f64>,
    /// Unix seconds of the last probe (0 = never).
    pub checked_at: i64,
}

/// Immutable availability snapshot across all configured servers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSnapshot {
    servers: Vec<ServerHealth>,
}

impl HealthSnapshot {
    /// Snapshot with every server in `Unknown` state.
    pub fn unknown(config: &Config) -> Self {
        Self {
            servers: config
                .enabled_servers()
                .into_iter()
                .map(|s| ServerHealth {
                    id: s.id.clone(),
                    status: ServerStatus::Unknown,
                    latency_ms: None,
                    checked_at: 0,
                })
                .collect(),
        }
    }

    /// All per-server records.
    pub fn servers(&self) -> &[ServerHealth] {
        &self.servers
    }

    /// Whether `id` should be treated as available for placement.
    ///
    /// `Unknown` counts as available: a server that was never probed (or a
    /// recovering one) is still worth trying.
    pub fn is_available(&self, id: &str) -> bool {
        self.servers
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.status != ServerStatus::Unavailable)
            .unwrap_or(true)
    }

    /// Count of servers whose last probe succeeded.
    pub fn healthy_count(&self) -> u32 {
        self.servers
            .iter()
            .filter(|s| s.status == ServerStatus::Available)
            .count() as u32
    }

    /// Total servers in the snapshot.
    pub fn total_count(&self) -> u32 {
        self.servers.len() as u32
    }

    /// Build the placer's view from configuration plus this snapshot.
    pub fn placement_view(&self, config: &Config) -> Vec<ServerSnapshot> {
        config
            .enabled_servers()
            .into_iter()
            .map(|s| ServerSnapshot {
                id: s.id.clone(),
                priority: s.priority,
                available: self.is_available(&s.id),
            })
            .collect()
    }
}

/// Ping every enabled server and build a fresh snapshot.
pub async fn probe_servers(
    store: &dyn BlobStore,
    config: &Config,
    deadline: Duration,
) -> HealthSnapshot {
    let mut servers = Vec::new();

    for server in config.enabled_servers() {
        let record = match store.ping(&server.id, deadline).await {
            Ok(latency_ms) => {
                debug!(server_id = %server.id, latency_ms, "server responded");
                ServerHealth {
                    id: server.id.clone(),
                    status: ServerStatus::Available,
                    latency_ms: Some(latency_ms),
                    checked_at: now_timestamp(),
                }
            }
            Err(e) => {
                warn!(server_id = %server.id, error = %e, "server probe failed");
                ServerHealth {
                    id: server.id.clone(),
                    status: ServerStatus::Unavailable,
                    latency_ms: None,
                    checked_at: now_timestamp(),
                }
            }
        };
        servers.push(record);
    }

    HealthSnapshot { servers }
}

// ============================================================================
// TESTS
// ============================================================================
