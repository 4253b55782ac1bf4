//! # Repair Engine
//!
//! Restores the replication invariant after partial failure: every chunk
//! should have `replication_factor` byte-identical replicas on distinct
//! servers.
//!
//! ## Chunk State Machine
//!
//! ```text
//!    ┌──────────┐   all replicas valid, count ≥ R
//!    │ Healthy  │←──────────────────────┐
//!    └──────────┘                        │
//!          │ some corrupt / missing      │
//!          ▼                             │
//!    ┌──────────┐  cleanup + re-replicate│
//!    │Degraded/ │──────────────────────→─┘
//!    │Critical  │
//!    └──────────┘
//!          │ no valid replicas
//!          ▼
//!    ┌──────────┐  stays here; reported; manual intervention
//!    │  Lost    │
//!    └──────────┘
//! ```
//!
//! A replica is healthy iff its server is still configured and a fresh
//! download hashes to the chunk's recorded digest. Corrupt replicas are
//! deleted and dropped; unreachable ones are kept (the server may come
//! back) unless the server was removed from configuration entirely.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::crypto::{digests_equal, sha256};
use crate::engine::{retry_op, CancelToken};
use crate::error::{Error, Result};
use crate::manifest::{Chunk, Manifest, Placement, MAX_REPLICAS};
use crate::placement::{rank_candidates, ServerSnapshot};
use crate::transport::{chunk_path, BlobStore, RetryPolicy, DEFAULT_DEADLINE};

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Repair behaviour for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairMode {
    /// Classify only; no writes of any kind.
    VerifyOnly,
    /// Clean up corrupt replicas and re-replicate until the location list
    /// reaches the replication factor.
    Auto,
    /// As `Auto`, but count only verified-valid replicas toward the target,
    /// so chunks padded with stale placements get fresh copies too.
    Force,
}

/// Health of one chunk, from the count of verified-valid replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChunkHealth {
    /// At least `replication_factor` valid replicas.
    Healthy,
    /// More than one valid replica, but fewer than the target.
    Degraded,
    /// Exactly one valid replica left.
    Critical,
    /// No valid replica; the chunk cannot be recovered from the system.
    Lost,
}

/// Classify a chunk given its valid-replica count and the target factor.
pub fn classify_chunk(healthy_replicas: u32, replication_factor: u32) -> ChunkHealth {
    if healthy_replicas >= replication_factor {
        ChunkHealth::Healthy
    } else if healthy_replicas == 0 {
        ChunkHealth::Lost
    } else if healthy_replicas == 1 {
        ChunkHealth::Critical
    } else {
        ChunkHealth::Degraded
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Statistics from one repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairStats {
    /// Chunks examined.
    pub chunks_verified: u32,
    /// Chunks with full replication.
    pub chunks_healthy: u32,
    /// Chunks missing some replicas.
    pub chunks_degraded: u32,
    /// Chunks down to a single replica.
    pub chunks_critical: u32,
    /// Chunks with no valid replica.
    pub chunks_lost: u32,
    /// Chunks whose placements changed during the pass.
    pub chunks_repaired: u32,
    /// New replicas created.
    pub replicas_added: u32,
    /// Corrupt or dangling replicas removed.
    pub replicas_removed: u32,
    /// Wall-clock milliseconds for the pass.
    pub elapsed_ms: u64,
}

impl RepairStats {
    fn record_health(&mut self, health: ChunkHealth) {
        self.chunks_verified += 1;
        match health {
            ChunkHealth::Healthy => self.chunks_healthy += 1,
            ChunkHealth::Degraded => self.chunks_degraded += 1,
            ChunkHealth::Critical => self.chunks_critical += 1,
            ChunkHealth::Lost => self.chunks_lost += 1,
        }
    }

    /// The file-level health: the worst chunk health seen.
    pub fn file_health(&self) -> ChunkHealth {
        if self.chunks_lost > 0 {
            ChunkHealth::Lost
        } else if self.chunks_critical > 0 {
            ChunkHealth::Critical
        } else if self.chunks_degraded > 0 {
            ChunkHealth::Degraded
        } else {
            ChunkHealth::Healthy
        }
    }

    /// Fold another pass's stats into this one.
    pub fn merge(&mut self, other: &RepairStats) {
        self.chunks_verified += other.chunks_verified;
        self.chunks_healthy += other.chunks_healthy;
        self.chunks_degraded += other.chunks_degraded;
        self.chunks_critical += other.chunks_critical;
        self.chunks_lost += other.chunks_lost;
        self.chunks_repaired += other.chunks_repaired;
        self.replicas_added += other.replicas_added;
        self.replicas_removed += other.replicas_removed;
        self.elapsed_ms += other.elapsed_ms;
    }
}

/// File-level health summary across the whole system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemHealth {
    /// Files examined.
    pub total_files: u32,
    /// Files with every chunk fully replicated.
    pub healthy_files: u32,
    /// Files with under-replicated chunks.
    pub degraded_files: u32,
    /// Files with single-replica chunks.
    pub critical_files: u32,
    /// Files with unrecoverable chunks.
    pub lost_files: u32,
}

impl SystemHealth {
    /// Record one file's verify stats.
    pub fn record_file(&mut self, stats: &RepairStats) {
        self.total_files += 1;
        match stats.file_health() {
            ChunkHealth::Healthy => self.healthy_files += 1,
            ChunkHealth::Degraded => self.degraded_files += 1,
            ChunkHealth::Critical => self.critical_files += 1,
            ChunkHealth::Lost => self.lost_files += 1,
        }
    }
}

// ============================================================================
// REPAIR ENGINE
// ============================================================================

/// Outcome of probing one placement.
enum ReplicaProbe {
    Valid(Bytes),
    Corrupt,
    Unreachable,
    Dangling,
}

/// One repair pass over one manifest.
pub struct RepairEngine<'a> {
    config: &'a Config,
    store: Arc<dyn BlobStore>,
    view: Vec<ServerSnapshot>,
    cancel: CancelToken,
    policy: RetryPolicy,
}

impl<'a> RepairEngine<'a> {
    /// Build a repair engine over the placer's current server view.
    pub fn new(
        config: &'a Config,
        store: Arc<dyn BlobStore>,
        view: Vec<ServerSnapshot>,
        cancel: CancelToken,
    ) -> Self {
        let policy = RetryPolicy::with_attempts(config.max_retry_attempts);
        Self { config, store, view, cancel, policy }
    }

    /// Verify every chunk of `manifest` and, unless `VerifyOnly`, repair
    /// what can be repaired from surviving replicas.
    ///
    /// Under-replication after the pass is reported through the stats, not
    /// treated as a hard failure; only a cancel or a local fault aborts.
    pub async fn repair_file(
        &self,
        manifest: &mut Manifest,
        mode: RepairMode,
    ) -> Result<RepairStats> {
        let started = Instant::now();
        let mut stats = RepairStats::default();
        let replication_factor = manifest.replication_factor;
        let manifest_id = manifest.manifest_id.clone();

        // Per-server chunk counts for this manifest, kept current as
        // placements change so the placer keeps spreading evenly.
        let mut load = manifest_load(manifest);

        for chunk in manifest.chunks.iter_mut() {
            self.cancel.check()?;

            let mut valid_servers: HashSet<String> = HashSet::new();
            let mut corrupt_servers: Vec<String> = Vec::new();
            let mut dangling_servers: Vec<String> = Vec::new();
            let mut authoritative: Option<Bytes> = None;

            for placement in &chunk.locations {
                match self.probe_replica(chunk, placement).await? {
                    ReplicaProbe::Valid(bytes) => {
                        valid_servers.insert(placement.server_id.clone());
                        authoritative.get_or_insert(bytes);
                    }
                    ReplicaProbe::Corrupt => corrupt_servers.push(placement.server_id.clone()),
                    ReplicaProbe::Dangling => dangling_servers.push(placement.server_id.clone()),
                    ReplicaProbe::Unreachable => {}
                }
            }

            let health = classify_chunk(valid_servers.len() as u32, replication_factor);
            stats.record_health(health);
            debug!(
                sequence = chunk.sequence,
                valid = valid_servers.len(),
                corrupt = corrupt_servers.len(),
                dangling = dangling_servers.len(),
                ?health,
                "chunk classified"
            );

            if mode == RepairMode::VerifyOnly {
                continue;
            }

            let mut changed = false;

            // Cleanup: corrupt replicas are deleted and dropped; dangling
            // placements (server no longer configured) are just dropped.
            for server_id in &corrupt_servers {
                if let Some(placement) = chunk.location_for(server_id) {
                    let remote_path = placement.remote_path.clone();
                    if let Err(e) =
                        self.store.delete(server_id, &remote_path, DEFAULT_DEADLINE).await
                    {
                        warn!(server_id = %server_id, error = %e, "corrupt replica delete failed");
                    }
                }
                chunk.remove_location(server_id);
                decrement(&mut load, server_id);
                stats.replicas_removed += 1;
                changed = true;
            }
            for server_id in &dangling_servers {
                chunk.remove_location(server_id);
                stats.replicas_removed += 1;
                changed = true;
            }

            for placement in chunk.locations.iter_mut() {
                if valid_servers.contains(&placement.server_id) {
                    placement.mark_verified();
                }
            }

            // Re-replicate from the authoritative payload.
            if let Some(payload) = authoritative {
                let added = self
                    .replicate_chunk(
                        chunk,
                        &payload,
                        &manifest_id,
                        replication_factor,
                        mode,
                        &mut load,
                        valid_servers.len() as u32,
                    )
                    .await?;
                if added > 0 {
                    stats.replicas_added += added;
                    changed = true;
                }
            }

            if changed {
                stats.chunks_repaired += 1;
            }
        }

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            remote_name = %manifest.remote_name,
            verified = stats.chunks_verified,
            repaired = stats.chunks_repaired,
            added = stats.replicas_added,
            removed = stats.replicas_removed,
            "repair pass finished"
        );
        Ok(stats)
    }

    /// Download one placement and judge it.
    async fn probe_replica(&self, chunk: &Chunk, placement: &Placement) -> Result<ReplicaProbe> {
        if self.config.server(&placement.server_id).is_none() {
            return Ok(ReplicaProbe::Dangling);
        }

        let (result, _) = retry_op(self.policy, &self.cancel, || {
            let store = Arc::clone(&self.store);
            let server_id = placement.server_id.clone();
            let remote_path = placement.remote_path.clone();
            async move { store.get(&server_id, &remote_path, DEFAULT_DEADLINE).await }
        })
        .await;

        match result {
            Ok(bytes) => {
                if digests_equal(&sha256(&bytes), &chunk.hash) {
                    Ok(ReplicaProbe::Valid(bytes))
                } else {
                    Ok(ReplicaProbe::Corrupt)
                }
            }
            Err(Error::NotFound(_)) => Ok(ReplicaProbe::Corrupt),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(_) => Ok(ReplicaProbe::Unreachable),
        }
    }

    /// Add replicas until the chunk reaches its target, or candidates run
    /// out. Returns how many were added.
    #[allow(clippy::too_many_arguments)]
    async fn replicate_chunk(
        &self,
        chunk: &mut Chunk,
        payload: &Bytes,
        manifest_id: &str,
        replication_factor: u32,
        mode: RepairMode,
        load: &mut HashMap<String, u32>,
        mut valid_count: u32,
    ) -> Result<u32> {
        let mut added = 0u32;

        loop {
            self.cancel.check()?;

            // Auto counts every placement toward the target; Force counts
            // only replicas verified valid this pass, so stale entries do
            // not mask under-replication.
            let have = match mode {
                RepairMode::Force => valid_count,
                _ => chunk.locations.len() as u32,
            };
            if have >= replication_factor || chunk.locations.len() as u32 >= MAX_REPLICAS {
                break;
            }

            let exclude: HashSet<String> = chunk.placed_servers().into_iter().collect();
            let candidates = rank_candidates(&self.view, load, &exclude);
            if candidates.is_empty() {
                warn!(
                    sequence = chunk.sequence,
                    replicas = chunk.locations.len(),
                    target = replication_factor,
                    "no candidate servers left, chunk stays under-replicated"
                );
                break;
            }

            let mut placed = false;
            for server_id in candidates {
                let Some(server) = self.config.server(&server_id) else { continue };
                let remote_path =
                    chunk_path(&server.base_path, manifest_id, chunk.sequence, &chunk.id);

                let (result, _) = retry_op(self.policy, &self.cancel, || {
                    let store = Arc::clone(&self.store);
                    let server_id = server_id.clone();
                    let remote_path = remote_path.clone();
                    let payload = payload.clone();
                    async move {
                        store.put(&server_id, &remote_path, payload, DEFAULT_DEADLINE).await
                    }
                })
                .await;

                match result {
                    Ok(()) => {
                        let mut placement = Placement::new(server_id.clone(), remote_path);
                        placement.mark_verified();
                        chunk.add_location(placement)?;
                        *load.entry(server_id).or_insert(0) += 1;
                        valid_count += 1;
                        added += 1;
                        placed = true;
                        break;
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        warn!(server_id = %server_id, sequence = chunk.sequence, error = %e,
                              "replica put failed, trying next candidate");
                    }
                }
            }

            if !placed {
                break;
            }
        }

        Ok(added)
    }

    // ------------------------------------------------------------------------
    // Rebalance
    // ------------------------------------------------------------------------

    /// Equalize per-server chunk counts for one manifest.
    ///
    /// Targets are `⌊N/S⌋` chunks per server with the remainder spread over
    /// the lexicographically smallest server ids. A replica is moved by
    /// copying it to an under-target server and deleting the original only
    /// once the replication factor is still satisfied. Bounded by
    /// `max_rebalance_moves`.
    pub async fn rebalance(&self, manifest: &mut Manifest) -> Result<u32> {
        let mut server_ids: Vec<String> =
            self.config.enabled_servers().iter().map(|s| s.id.clone()).collect();
        server_ids.sort();
        if server_ids.is_empty() {
            return Ok(0);
        }

        let mut counts: HashMap<String, u32> = server_ids.iter().map(|id| (id.clone(), 0)).collect();
        for chunk in &manifest.chunks {
            for placement in &chunk.locations {
                if let Some(count) = counts.get_mut(&placement.server_id) {
                    *count += 1;
                }
            }
        }

        let total: u32 = counts.values().sum();
        if total == 0 {
            return Ok(0);
        }

        let base = total / server_ids.len() as u32;
        let remainder = total % server_ids.len() as u32;
        let target: HashMap<String, u32> = server_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), base + u32::from((i as u32) < remainder)))
            .collect();

        let replication_factor = manifest.replication_factor;
        let manifest_id = manifest.manifest_id.clone();
        let mut moves = 0u32;

        'outer: for from_id in &server_ids {
            while counts[from_id] > target[from_id] {
                if moves >= self.config.max_rebalance_moves {
                    info!(moves, "rebalance move cap reached");
                    break 'outer;
                }
                self.cancel.check()?;

                let Some(to_id) = server_ids.iter().find(|id| counts[*id] < target[*id]) else {
                    break;
                };
                let to_id = to_id.clone();

                let moved = self
                    .move_one_replica(manifest, &manifest_id, from_id, &to_id, replication_factor)
                    .await?;
                match moved {
                    MoveOutcome::Moved => {
                        *counts.get_mut(from_id).unwrap() -= 1;
                        *counts.get_mut(&to_id).unwrap() += 1;
                        moves += 1;
                    }
                    MoveOutcome::Copied => {
                        // Replica added but the original kept (factor not yet
                        // exceeded); the source count is unchanged.
                        *counts.get_mut(&to_id).unwrap() += 1;
                        moves += 1;
                    }
                    MoveOutcome::Nothing => break,
                }
            }
        }

        if moves > 0 {
            info!(remote_name = %manifest.remote_name, moves, "rebalance finished");
        }
        Ok(moves)
    }

    /// Move (or copy) one replica from `from_id` to `to_id`.
    async fn move_one_replica(
        &self,
        manifest: &mut Manifest,
        manifest_id: &str,
        from_id: &str,
        to_id: &str,
        replication_factor: u32,
    ) -> Result<MoveOutcome> {
        for chunk in manifest.chunks.iter_mut() {
            if !chunk.has_location(from_id)
                || chunk.has_location(to_id)
                || chunk.locations.len() as u32 >= MAX_REPLICAS
            {
                continue;
            }

            let source_path = match chunk.location_for(from_id) {
                Some(p) => p.remote_path.clone(),
                None => continue,
            };

            // Fetch and verify the payload from the source replica.
            let (result, _) = retry_op(self.policy, &self.cancel, || {
                let store = Arc::clone(&self.store);
                let from_id = from_id.to_string();
                let source_path = source_path.clone();
                async move { store.get(&from_id, &source_path, DEFAULT_DEADLINE).await }
            })
            .await;
            let payload = match result {
                Ok(bytes) if digests_equal(&sha256(&bytes), &chunk.hash) => bytes,
                Ok(_) | Err(_) => continue,
            };

            let Some(to_server) = self.config.server(to_id) else { continue };
            let dest_path =
                chunk_path(&to_server.base_path, manifest_id, chunk.sequence, &chunk.id);

            let (result, _) = retry_op(self.policy, &self.cancel, || {
                let store = Arc::clone(&self.store);
                let to_id = to_id.to_string();
                let dest_path = dest_path.clone();
                let payload = payload.clone();
                async move { store.put(&to_id, &dest_path, payload, DEFAULT_DEADLINE).await }
            })
            .await;
            if result.is_err() {
                continue;
            }

            let mut placement = Placement::new(to_id.to_string(), dest_path);
            placement.mark_verified();
            chunk.add_location(placement)?;

            // Drop the source replica only once the factor stays satisfied.
            if chunk.locations.len() as u32 > replication_factor {
                if let Err(e) = self.store.delete(from_id, &source_path, DEFAULT_DEADLINE).await {
                    warn!(server_id = from_id, error = %e, "source replica delete failed");
                }
                chunk.remove_location(from_id);
                return Ok(MoveOutcome::Moved);
            }
            return Ok(MoveOutcome::Copied);
        }

        Ok(MoveOutcome::Nothing)
    }
}

enum MoveOutcome {
    Moved,
    Copied,
    Nothing,
}

/// Per-server chunk counts for one manifest.
fn manifest_load(manifest: &Manifest) -> HashMap<String, u32> {
    let mut load = HashMap::new();
    for chunk in &manifest.chunks {
        for placement in &chunk.locations {
            *load.entry(placement.server_id.clone()).or_insert(0) += 1;
        }
    }
    load
}

fn decrement(load: &mut HashMap<String, u32>, server_id: &str) {
    if let Some(count) = load.get_mut(server_id) {
        *count = count.saturating_sub(1);
    }
}

// ============================================================================
// TESTS
// ============================================================================
