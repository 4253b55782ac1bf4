//! In-memory [`BlobStore`] with fault injection.
//!
//! Models a fleet of servers as hash maps of objects, with the failure
//! knobs the engine and repair tests need: whole-server outages, fail-the-
//! next-N-calls, and single-byte object corruption. Per-server counters
//! track uploads and downloads so tests can assert on traffic shape.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::transport::{BlobStat, BlobStore};

/// Per-server traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerCounters {
    /// Successful `put` calls.
    pub uploads: u64,
    /// Successful `get` calls.
    pub downloads: u64,
    /// Calls rejected by fault injection or unavailability.
    pub failures: u64,
}

#[derive(Default)]
struct ServerState {
    objects: HashMap<String, Bytes>,
    available: bool,
    fail_next: u32,
    fail_put_substring: Option<String>,
    latency_ms: f64,
    counters: ServerCounters,
}

/// In-memory multi-server blob store for tests and benchmarks.
#[derive(Default)]
pub struct MemoryBlobStore {
    servers: Mutex<HashMap<String, ServerState>>,
}

impl MemoryBlobStore {
    /// Empty store with no servers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `ids` as healthy servers.
    pub fn with_servers<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for id in ids {
            store.add_server(id);
        }
        store
    }

    /// Register a healthy server.
    pub fn add_server(&self, id: impl Into<String>) {
        self.servers.lock().insert(
            id.into(),
            ServerState { available: true, latency_ms: 1.0, ..Default::default() },
        );
    }

    /// Remove a server and everything stored on it.
    pub fn remove_server(&self, id: &str) {
        self.servers.lock().remove(id);
    }

    /// Toggle a whole-server outage.
    pub fn set_available(&self, id: &str, available: bool) {
        if let Some(server) = self.servers.lock().get_mut(id) {
            server.available = available;
        }
    }

    /// Make the next `n` calls against `id` fail with a transport error.
    pub fn fail_next(&self, id: &str, n: u32) {
        if let Some(server) = self.servers.lock().get_mut(id) {
            server.fail_next = n;
        }
    }

    /// Fail every `put` whose path contains `substring` (pass `None` to
    /// clear). Other operations are unaffected.
    pub fn fail_put_matching(&self, id: &str, substring: Option<&str>) {
        if let Some(server) = self.servers.lock().get_mut(id) {
            server.fail_put_substring = substring.map(str::to_string);
        }
    }

    /// Set the latency reported by `ping`.
    pub fn set_latency(&self, id: &str, latency_ms: f64) {
        if let Some(server) = self.servers.lock().get_mut(id) {
            server.latency_ms = latency_ms;
        }
    }

    /// Flip one bit of a stored object. Returns whether the object existed.
    pub fn corrupt_object(&self, id: &str, remote_path: &str) -> bool {
        let mut servers = self.servers.lock();
        let Some(server) = servers.get_mut(id) else { return false };
        let Some(data) = server.objects.get_mut(remote_path) else { return false };
        if data.is_empty() {
            return false;
        }
        let mut bytes = data.to_vec();
        bytes[0] ^= 0x01;
        *data = Bytes::from(bytes);
        true
    }

    /// Remove a stored object directly, bypassing the BlobStore API.
    pub fn drop_object(&self, id: &str, remote_path: &str) -> bool {
        self.servers
            .lock()
            .get_mut(id)
            .map(|s| s.objects.remove(remote_path).is_some())
            .unwrap_or(false)
    }

    /// Whether `remote_path` exists on `id`.
    pub fn contains(&self, id: &str, remote_path: &str) -> bool {
        self.servers
            .lock()
            .get(id)
            .map(|s| s.objects.contains_key(remote_path))
            .unwrap_or(false)
    }

    /// Number of objects stored on `id`.
    pub fn object_count(&self, id: &str) -> usize {
        self.servers.lock().get(id).map(|s| s.objects.len()).unwrap_or(0)
    }

    /// Paths of all objects on `id`, sorted.
    pub fn object_paths(&self, id: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .servers
            .lock()
            .get(id)
            .map(|s| s.objects.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Traffic counters for `id`.
    pub fn counters(&self, id: &str) -> ServerCounters {
        self.servers.lock().get(id).map(|s| s.counters).unwrap_or_default()
    }

    /// Run `f` on the server state, applying outage and fail-next gates.
    fn with_server<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut ServerState) -> Result<T>,
    ) -> Result<T> {
        let mut servers = self.servers.lock();
        let server = servers
            .get_mut(id)
            .ok_or_else(|| Error::Transport(format!("unknown server '{}'", id)))?;

        if server.fail_next > 0 {
            server.fail_next -= 1;
            server.counters.failures += 1;
            return Err(Error::Transport(format!("injected failure on '{}'", id)));
        }
        if !server.available {
            server.counters.failures += 1;
            return Err(Error::Transport(format!("server '{}' unavailable", id)));
        }

        f(server)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        server_id: &str,
        remote_path: &str,
        data: Bytes,
        _deadline: Duration,
    ) -> Result<()> {
        self.with_server(server_id, |server| {
            if let Some(substring) = &server.fail_put_substring {
                if remote_path.contains(substring.as_str()) {
                    server.counters.failures += 1;
                    return Err(Error::Transport(format!(
                        "injected put failure for '{}'",
                        remote_path
                    )));
                }
            }
            server.objects.insert(remote_path.to_string(), data);
            server.counters.uploads += 1;
            Ok(())
        })
    }

    async fn get(&self, server_id: &str, remote_path: &str, _deadline: Duration) -> Result<Bytes> {
        self.with_server(server_id, |server| {
            let data = server
                .objects
                .get(remote_path)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("no object at '{}'", remote_path)))?;
            server.counters.downloads += 1;
            Ok(data)
        })
    }

    async fn delete(&self, server_id: &str, remote_path: &str, _deadline: Duration) -> Result<()> {
        self.with_server(server_id, |server| {
            server.objects.remove(remote_path);
            Ok(())
        })
    }

    async fn stat(
        &self,
        server_id: &str,
        remote_path: &str,
        _deadline: Duration,
    ) -> Result<BlobStat> {
        self.with_server(server_id, |server| {
            Ok(match server.objects.get(remote_path) {
                Some(data) => BlobStat { exists: true, size: data.len() as u64 },
                None => BlobStat { exists: false, size: 0 },
            })
        })
    }

    async fn list(
        &self,
        server_id: &str,
        remote_dir: &str,
        _deadline: Duration,
    ) -> Result<Vec<String>> {
        let dir = format!("{}/", remote_dir.trim_end_matches('/'));
        self.with_server(server_id, |server| {
            let mut names: Vec<String> = server
                .objects
                .keys()
                .filter_map(|path| path.strip_prefix(&dir))
                .filter(|rest| !rest.contains('/'))
                .map(str::to_string)
                .collect();
            names.sort();
            Ok(names)
        })
    }

    async fn mkdir(&self, server_id: &str, _remote_path: &str, _deadline: Duration) -> Result<()> {
        // Directories are implicit in a hash-map namespace; only the
        // availability gates apply.
        self.with_server(server_id, |_| Ok(()))
    }

    async fn ping(&self, server_id: &str, _deadline: Duration) -> Result<f64> {
        self.with_server(server_id, |server| Ok(server.latency_ms))
    }
}

// ============================================================================
// TESTS
// ============================================================================
