//! Directory-backed [`BlobStore`]: each server is a subdirectory on the
//! local filesystem.
//!
//! This is the reference adapter for running the engine without network
//! access — demos, the `health` verb against local mounts, and manual
//! testing. Remote paths map onto files under the server's root, with the
//! leading `/` stripped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{BlobStat, BlobStore};

/// Blob store over local directories, one per server id.
pub struct DirBlobStore {
    roots: HashMap<String, PathBuf>,
}

impl DirBlobStore {
    /// Empty store; add servers with [`DirBlobStore::add_server`].
    pub fn new() -> Self {
        Self { roots: HashMap::new() }
    }

    /// Register `id` rooted at `root`, creating the directory if needed.
    pub fn add_server(&mut self, id: impl Into<String>, root: impl Into<PathBuf>) -> Result<()> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        self.roots.insert(id.into(), root);
        Ok(())
    }

    /// One store with a subdirectory per server id under `base`.
    pub fn with_layout(base: &Path, server_ids: &[&str]) -> Result<Self> {
        let mut store = Self::new();
        for id in server_ids {
            store.add_server(*id, base.join(id))?;
        }
        Ok(store)
    }

    fn resolve(&self, server_id: &str, remote_path: &str) -> Result<PathBuf> {
        let root = self
            .roots
            .get(server_id)
            .ok_or_else(|| Error::Transport(format!("unknown server '{}'", server_id)))?;

        let relative = remote_path.trim_start_matches('/');
        if relative.split('/').any(|part| part == "..") {
            return Err(Error::InvalidInput(format!(
                "remote path '{}' must not traverse upward",
                remote_path
            )));
        }
        Ok(root.join(relative))
    }
}

impl Default for DirBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap a filesystem future in the per-call deadline.
async fn bounded<T>(
    deadline: Duration,
    what: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    timeout(deadline, fut)
        .await
        .map_err(|_| Error::Transport(format!("{} deadline exceeded", what)))?
}

#[async_trait]
impl BlobStore for DirBlobStore {
    async fn put(
        &self,
        server_id: &str,
        remote_path: &str,
        data: Bytes,
        deadline: Duration,
    ) -> Result<()> {
        let path = self.resolve(server_id, remote_path)?;
        bounded(deadline, "put", async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &data).await?;
            debug!(server_id, path = %path.display(), bytes = data.len(), "object written");
            Ok(())
        })
        .await
    }

    async fn get(&self, server_id: &str, remote_path: &str, deadline: Duration) -> Result<Bytes> {
        let path = self.resolve(server_id, remote_path)?;
        bounded(deadline, "get", async {
            let data = tokio::fs::read(&path).await?;
            Ok(Bytes::from(data))
        })
        .await
    }

    async fn delete(&self, server_id: &str, remote_path: &str, deadline: Duration) -> Result<()> {
        let path = self.resolve(server_id, remote_path)?;
        bounded(deadline, "delete", async {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn stat(
        &self,
        server_id: &str,
        remote_path: &str,
        deadline: Duration,
    ) -> Result<BlobStat> {
        let path = self.resolve(server_id, remote_path)?;
        bounded(deadline, "stat", async {
            match tokio::fs::metadata(&path).await {
                Ok(meta) => Ok(BlobStat { exists: true, size: meta.len() }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Ok(BlobStat { exists: false, size: 0 })
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn list(
        &self,
        server_id: &str,
        remote_dir: &str,
        deadline: Duration,
    ) -> Result<Vec<String>> {
        let path = self.resolve(server_id, remote_dir)?;
        bounded(deadline, "list", async {
            let mut names = Vec::new();
            let mut entries = match tokio::fs::read_dir(&path).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn mkdir(&self, server_id: &str, remote_path: &str, deadline: Duration) -> Result<()> {
        let path = self.resolve(server_id, remote_path)?;
        bounded(deadline, "mkdir", async {
            tokio::fs::create_dir_all(&path).await?;
            Ok(())
        })
        .await
    }

    async fn ping(&self, server_id: &str, deadline: Duration) -> Result<f64> {
        let root = self
            .roots
            .get(server_id)
            .ok_or_else(|| Error::Transport(format!("unknown server '{}'", server_id)))?
            .clone();

        let started = Instant::now();
        bounded(deadline, "ping", async {
            let meta = tokio::fs::metadata(&root).await?;
            if !meta.is_dir() {
                return Err(Error::Transport(format!(
                    "server '{}' root is not a directory",
                    server_id
                )));
            }
            Ok(started.elapsed().as_secs_f64() * 1000.0)
        })
        .await
    }
}

// ============================================================================
// TESTS
// ============================================================================
