//! # Storage Engine
//!
//! Orchestrates every user-facing operation over the BlobStore capability.
//!
//! ## Operation Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ENGINE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  upload    local file → Chunker → Placer → BlobStore puts              │
//! │            → Manifest commit to every server + local cache            │
//! │                                                                         │
//! │  download  manifest locate → per chunk: replica fallback →            │
//! │            hash check → sequential write → optional full re-hash      │
//! │                                                                         │
//! │  delete    manifest → best-effort replica deletes → manifest deletes  │
//! │                                                                         │
//! │  list      manifest-dir scan across servers → dedup → tolerant reads  │
//! │                                                                         │
//! │  verify    manifest → repair engine (VerifyOnly / Auto)               │
//! │                                                                         │
//! │  health    ping every server → availability snapshot for the placer   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concurrent operations on the same `remote_name` are not coordinated:
//! the manifest object is last-writer-wins. One engine instance processes
//! one file operation at a time.

mod download;
mod upload;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::health::{self, HealthSnapshot, ServerHealth};
use crate::manifest::store::ManifestStore;
use crate::manifest::{codec, Manifest};
use crate::repair::{RepairEngine, RepairMode, RepairStats, SystemHealth};
use crate::transport::{
    manifest_dir, manifest_path, remote_name_from_manifest_object, BlobStore, RetryPolicy,
    DEFAULT_DEADLINE,
};

// ============================================================================
// CANCELLATION
// ============================================================================

/// Cloneable cancel signal checked at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// PROGRESS & STATS
// ============================================================================

/// One progress notification.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Human-readable phase, e.g. `"Uploading chunks"`.
    pub operation: &'static str,
    /// Progress units done.
    pub current: u64,
    /// Total progress units.
    pub total: u64,
    /// Payload bytes done.
    pub bytes_done: u64,
    /// Total payload bytes.
    pub bytes_total: u64,
}

/// Progress observer callback.
pub type ProgressFn = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Statistics for one upload or download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpStats {
    /// Payload bytes moved.
    pub bytes_processed: u64,
    /// Chunks moved.
    pub chunks_processed: u32,
    /// Distinct servers touched.
    pub servers_used: u32,
    /// Wall-clock milliseconds.
    pub elapsed_ms: u64,
    /// BlobStore retries performed across the operation.
    pub retries: u32,
}

// ============================================================================
// RETRY DRIVER
// ============================================================================

/// Run `op` under `policy`, sleeping between attempts.
///
/// Only transport errors are retried; everything else (not-found, integrity,
/// invalid input) fails fast so replica fallback can take over. Returns the
/// final result plus the number of retries performed.
pub(crate) async fn retry_op<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancelToken,
    mut op: F,
) -> (Result<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut retries = 0u32;
    let mut attempt = 0u32;

    loop {
        if let Err(e) = cancel.check() {
            return (Err(e), retries);
        }
        match op().await {
            Ok(value) => return (Ok(value), retries),
            Err(Error::Transport(msg)) if attempt + 1 < policy.max_attempts => {
                debug!(attempt, error = %msg, "transport error, backing off");
                retries += 1;
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(e) => return (Err(e), retries),
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// The storage engine: one configured instance per process.
pub struct Engine {
    config: Config,
    store: Arc<dyn BlobStore>,
    manifests: ManifestStore,
    health: RwLock<HealthSnapshot>,
    progress: Option<ProgressFn>,
    cancel: CancelToken,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine over a validated configuration and a transport.
    pub fn new(config: Config, store: Arc<dyn BlobStore>) -> Result<Self> {
        config.validate()?;
        let manifests = ManifestStore::open(
            config.manifest_dir_expanded(),
            config.auto_backup,
            config.max_backups,
        )?;
        let health = RwLock::new(HealthSnapshot::unknown(&config));
        Ok(Self { config, store, manifests, health, progress: None, cancel: CancelToken::new() })
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The local manifest cache.
    pub fn manifest_store(&self) -> &ManifestStore {
        &self.manifests
    }

    /// Install a progress observer.
    pub fn set_progress(&mut self, progress: ProgressFn) {
        self.progress = Some(progress);
    }

    /// Handle for cancelling in-flight operations.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_attempts(self.config.max_retry_attempts)
    }

    pub(crate) fn notify_progress(
        &self,
        operation: &'static str,
        current: u64,
        total: u64,
        bytes_done: u64,
        bytes_total: u64,
    ) {
        if let Some(progress) = &self.progress {
            progress(&ProgressUpdate { operation, current, total, bytes_done, bytes_total });
        }
    }

    pub(crate) fn placement_view(&self) -> Vec<crate::placement::ServerSnapshot> {
        self.health.read().placement_view(&self.config)
    }

    /// Sequential retry wrapper that accumulates into an operation counter.
    pub(crate) async fn with_retries<T, F, Fut>(&self, retries: &mut u32, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let (result, performed) = retry_op(self.retry_policy(), &self.cancel, op).await;
        *retries += performed;
        result
    }

    // ------------------------------------------------------------------------
    // Manifest location & commit
    // ------------------------------------------------------------------------

    /// Locate the manifest for `remote_name`.
    ///
    /// Servers are scanned in priority order until one returns a valid
    /// manifest; corrupt or unreachable copies are skipped with a warning.
    /// Falls back to the local manifest cache before giving up.
    pub async fn fetch_manifest(&self, remote_name: &str) -> Result<Manifest> {
        for server in self.config.enabled_servers() {
            let path = manifest_path(&server.base_path, remote_name);
            match self.store.get(&server.id, &path, DEFAULT_DEADLINE).await {
                Ok(bytes) => match std::str::from_utf8(&bytes)
                    .map_err(|e| Error::ManifestCorrupt(e.to_string()))
                    .and_then(codec::from_json)
                {
                    Ok(manifest) => return Ok(manifest),
                    Err(e) => {
                        warn!(server_id = %server.id, remote_name, error = %e,
                              "skipping unreadable manifest copy");
                    }
                },
                Err(Error::NotFound(_)) => {}
                Err(e) => {
                    warn!(server_id = %server.id, remote_name, error = %e,
                          "server unreachable while locating manifest");
                }
            }
        }

        if let Ok(manifest) = self.manifests.load(remote_name) {
            warn!(remote_name, "using local manifest cache, no server copy found");
            return Ok(manifest);
        }

        Err(Error::NotFound(format!("no manifest for '{}'", remote_name)))
    }

    /// Write `manifest` to every enabled server, bounded by the concurrency
    /// cap. Returns the number of servers that accepted it.
    pub(crate) async fn commit_manifest(
        &self,
        manifest: &Manifest,
        retries: &mut u32,
    ) -> Result<u32> {
        let json = Bytes::from(codec::to_json(manifest)?);
        let policy = self.retry_policy();
        let cancel = self.cancel.clone();

        let tasks = self.config.enabled_servers().into_iter().map(|server| {
            let store = Arc::clone(&self.store);
            let cancel = cancel.clone();
            let json = json.clone();
            let server_id = server.id.clone();
            let path = manifest_path(&server.base_path, &manifest.remote_name);

            async move {
                let (result, performed) = retry_op(policy, &cancel, || {
                    let store = Arc::clone(&store);
                    let json = json.clone();
                    let server_id = server_id.clone();
                    let path = path.clone();
                    async move { store.put(&server_id, &path, json, DEFAULT_DEADLINE).await }
                })
                .await;
                (server_id, result, performed)
            }
        });

        let results: Vec<(String, Result<()>, u32)> = stream::iter(tasks)
            .buffer_unordered(self.config.max_concurrent_operations)
            .collect()
            .await;

        let mut successes = 0u32;
        for (server_id, result, performed) in results {
            *retries += performed;
            match result {
                Ok(()) => successes += 1,
                Err(e) => warn!(server_id = %server_id, error = %e, "manifest write failed"),
            }
        }
        Ok(successes)
    }

    /// Best-effort removal of every placement recorded in `manifest`.
    pub(crate) async fn rollback_placements(&self, manifest: &Manifest) {
        for chunk in &manifest.chunks {
            for placement in &chunk.locations {
                if self.config.server(&placement.server_id).is_none() {
                    continue;
                }
                if let Err(e) = self
                    .store
                    .delete(&placement.server_id, &placement.remote_path, DEFAULT_DEADLINE)
                    .await
                {
                    warn!(server_id = %placement.server_id,
                          remote_path = %placement.remote_path,
                          error = %e,
                          "rollback delete failed, chunk is orphaned");
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    /// Delete a stored file: every replica best-effort, then the manifest
    /// objects. Succeeds iff the manifest was removed from at least one
    /// server.
    pub async fn delete(&self, remote_name: &str) -> Result<()> {
        let manifest = self.fetch_manifest(remote_name).await?;

        for chunk in &manifest.chunks {
            self.cancel.check()?;
            for placement in &chunk.locations {
                if self.config.server(&placement.server_id).is_none() {
                    continue;
                }
                if let Err(e) = self
                    .store
                    .delete(&placement.server_id, &placement.remote_path, DEFAULT_DEADLINE)
                    .await
                {
                    warn!(server_id = %placement.server_id,
                          sequence = chunk.sequence,
                          error = %e,
                          "replica delete failed");
                }
            }
        }

        let mut removed = 0u32;
        for server in self.config.enabled_servers() {
            let path = manifest_path(&server.base_path, remote_name);
            match self.store.delete(&server.id, &path, DEFAULT_DEADLINE).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(server_id = %server.id, error = %e, "manifest delete failed");
                }
            }
        }

        self.manifests.delete(remote_name)?;

        if removed == 0 {
            return Err(Error::Transport(format!(
                "manifest for '{}' could not be removed from any server",
                remote_name
            )));
        }
        info!(remote_name, removed, "file deleted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // List
    // ------------------------------------------------------------------------

    /// Enumerate every stored file across all servers.
    ///
    /// Unreachable servers and unreadable manifests are skipped with a
    /// warning; one healthy copy is enough for a file to be listed.
    pub async fn list(&self) -> Result<Vec<Manifest>> {
        let mut names: BTreeSet<String> = BTreeSet::new();

        for server in self.config.enabled_servers() {
            let dir = manifest_dir(&server.base_path);
            match self.store.list(&server.id, &dir, DEFAULT_DEADLINE).await {
                Ok(objects) => {
                    for object in objects {
                        if let Some(name) = remote_name_from_manifest_object(&object) {
                            names.insert(name.to_string());
                        }
                    }
                }
                Err(e) => {
                    warn!(server_id = %server.id, error = %e, "manifest listing failed");
                }
            }
        }

        let mut manifests = Vec::with_capacity(names.len());
        for name in names {
            self.cancel.check()?;
            match self.fetch_manifest(&name).await {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => warn!(remote_name = %name, error = %e, "skipping unreadable manifest"),
            }
        }
        Ok(manifests)
    }

    // ------------------------------------------------------------------------
    // Verify / repair
    // ------------------------------------------------------------------------

    /// Verify one stored file, optionally repairing it.
    ///
    /// Thin wrapper over the repair engine: `repair = false` classifies
    /// only (unless `auto_repair_enabled` upgrades the pass, after
    /// `repair_delay` seconds); `repair = true` runs an Auto repair pass.
    /// The manifest is persisted when placements changed.
    pub async fn verify(&self, remote_name: &str, repair: bool) -> Result<RepairStats> {
        let auto = repair || self.config.auto_repair_enabled;
        if auto && !repair && self.config.repair_delay > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(self.config.repair_delay)).await;
        }
        let mode = if auto { RepairMode::Auto } else { RepairMode::VerifyOnly };
        self.verify_with_mode(remote_name, mode).await
    }

    /// Verify one stored file with an explicit repair mode.
    pub async fn verify_with_mode(
        &self,
        remote_name: &str,
        mode: RepairMode,
    ) -> Result<RepairStats> {
        let mut manifest = self.fetch_manifest(remote_name).await?;

        let repairer = RepairEngine::new(
            &self.config,
            Arc::clone(&self.store),
            self.placement_view(),
            self.cancel.clone(),
        );
        let stats = repairer.repair_file(&mut manifest, mode).await?;

        let mut rebalance_moves = 0u32;
        if mode != RepairMode::VerifyOnly && self.config.rebalancing_enabled {
            rebalance_moves = repairer.rebalance(&mut manifest).await?;
        }

        if mode != RepairMode::VerifyOnly
            && (stats.replicas_added > 0 || stats.replicas_removed > 0 || rebalance_moves > 0)
        {
            manifest.touch(false, true, true);
            let mut retries = 0u32;
            let committed = self.commit_manifest(&manifest, &mut retries).await?;
            if committed == 0 {
                return Err(Error::Transport(format!(
                    "repaired manifest for '{}' could not be written to any server",
                    remote_name
                )));
            }
            self.manifests.save(&manifest)?;
        }

        Ok(stats)
    }

    /// Verify (and optionally repair) every stored file.
    pub async fn repair_all(&self, mode: RepairMode) -> Result<RepairStats> {
        let mut total = RepairStats::default();
        for manifest in self.list().await? {
            self.cancel.check()?;
            let stats = self.verify_with_mode(&manifest.remote_name, mode).await?;
            total.merge(&stats);
        }
        Ok(total)
    }

    /// Classification-only sweep over every stored file.
    pub async fn system_health(&self) -> Result<SystemHealth> {
        let repairer = RepairEngine::new(
            &self.config,
            Arc::clone(&self.store),
            self.placement_view(),
            self.cancel.clone(),
        );

        let mut summary = SystemHealth::default();
        for mut manifest in self.list().await? {
            let stats = repairer.repair_file(&mut manifest, RepairMode::VerifyOnly).await?;
            summary.record_file(&stats);
        }
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------------

    /// Probe every server and refresh the availability snapshot the placer
    /// reads. Returns the per-server results.
    pub async fn health_check(&self) -> Result<Vec<ServerHealth>> {
        let snapshot = health::probe_servers(self.store.as_ref(), &self.config, DEFAULT_DEADLINE).await;
        let servers = snapshot.servers().to_vec();
        *self.health.write() = snapshot;
        Ok(servers)
    }

    /// Engine version string, recorded in manifests it creates.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

// ============================================================================
// TESTS
// ============================================================================
