//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use netchunk_core::config::{Config, ServerConfig};
use netchunk_core::engine::Engine;
use netchunk_core::transport::{BlobStore, MemoryBlobStore};

/// 1 MiB, the smallest legal chunk size. Tests use it so fixture files
/// stay small.
pub const CHUNK_1M: u64 = 1024 * 1024;

/// Build a config over `server_ids` with a temp-dir manifest cache and no
/// retry backoff (one attempt per call keeps failure tests instant).
pub fn test_config(server_ids: &[&str], replication_factor: u32, manifest_dir: &Path) -> Config {
    Config {
        chunk_size: CHUNK_1M,
        replication_factor,
        min_replicas_required: 1,
        max_retry_attempts: 1,
        manifest_dir: manifest_dir.to_string_lossy().into_owned(),
        auto_backup: false,
        servers: server_ids
            .iter()
            .map(|id| ServerConfig {
                id: id.to_string(),
                host: format!("{}.test", id),
                port: 21,
                username: String::new(),
                password: String::new(),
                base_path: "/netchunk".to_string(),
                use_ssl: false,
                priority: 0,
                enabled: true,
            })
            .collect(),
        ..Config::default()
    }
}

/// A fresh engine over a shared in-memory store.
pub fn test_engine(
    server_ids: &[&str],
    replication_factor: u32,
    workdir: &Path,
) -> (Engine, Arc<MemoryBlobStore>) {
    let store = Arc::new(MemoryBlobStore::with_servers(server_ids.iter().copied()));
    let config = test_config(server_ids, replication_factor, &workdir.join("manifests"));
    let dyn_store: Arc<dyn BlobStore> = store.clone();
    let engine = Engine::new(config, dyn_store).expect("engine construction");
    (engine, store)
}

/// Write `data` to `<dir>/<name>` and return the path.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("fixture write");
    path
}

/// Deterministic non-repeating payload of `len` bytes.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

/// Total objects across the given servers.
pub fn total_objects(store: &MemoryBlobStore, server_ids: &[&str]) -> usize {
    server_ids.iter().map(|id| store.object_count(id)).sum()
}

/// Chunk-object paths (not manifests) on one server.
pub fn chunk_objects(store: &MemoryBlobStore, server_id: &str) -> Vec<String> {
    store
        .object_paths(server_id)
        .into_iter()
        .filter(|p| p.contains("/chunks/"))
        .collect()
}
