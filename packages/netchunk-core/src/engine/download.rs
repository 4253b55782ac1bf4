//! Download protocol: locate the manifest, then rebuild the file chunk by
//! chunk with replica fallback.
//!
//! Replicas are tried verified-first, then oldest-upload-first; a replica
//! whose bytes fail the hash check is discarded and the next one tried.
//! The output file is written strictly in sequence order and deleted on
//! any failure, so a partial download never survives.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::crypto::{digests_equal, sha256, sha256_file};
use crate::engine::{Engine, OpStats};
use crate::error::{Error, Result};
use crate::manifest::Placement;
use crate::transport::DEFAULT_DEADLINE;

impl Engine {
    /// Download the file stored under `remote_name` into `local_path`.
    pub async fn download(&self, remote_name: &str, local_path: &Path) -> Result<OpStats> {
        let started = Instant::now();
        let mut retries = 0u32;
        let mut servers_used: HashSet<String> = HashSet::new();

        self.notify_progress("Loading manifest", 0, 1, 0, 0);
        let manifest = self.fetch_manifest(remote_name).await?;
        let total_chunks = manifest.chunk_count() as u64;
        let total_size = manifest.total_size;

        let mut output = File::create(local_path)?;
        let mut bytes_done = 0u64;

        self.notify_progress("Downloading chunks", 0, total_chunks, 0, total_size);

        for chunk in &manifest.chunks {
            if self.cancel.is_cancelled() {
                discard_partial(output, local_path);
                return Err(Error::Cancelled);
            }

            // Verified replicas first, then oldest uploads first.
            let mut placements: Vec<&Placement> = chunk.locations.iter().collect();
            placements.sort_by_key(|p| (!p.verified, p.uploaded_at));

            let mut written = false;
            for placement in placements {
                if self.config.server(&placement.server_id).is_none() {
                    continue;
                }

                let result = self
                    .with_retries(&mut retries, || {
                        let store = Arc::clone(&self.store);
                        let server_id = placement.server_id.clone();
                        let remote_path = placement.remote_path.clone();
                        async move { store.get(&server_id, &remote_path, DEFAULT_DEADLINE).await }
                    })
                    .await;

                match result {
                    Ok(bytes) => {
                        if !digests_equal(&sha256(&bytes), &chunk.hash) {
                            warn!(server_id = %placement.server_id,
                                  sequence = chunk.sequence,
                                  "replica failed hash check, trying next");
                            continue;
                        }
                        if let Err(e) = output.write_all(&bytes) {
                            discard_partial(output, local_path);
                            return Err(e.into());
                        }
                        servers_used.insert(placement.server_id.clone());
                        written = true;
                        break;
                    }
                    Err(Error::Cancelled) => {
                        discard_partial(output, local_path);
                        return Err(Error::Cancelled);
                    }
                    Err(e) => {
                        warn!(server_id = %placement.server_id,
                              sequence = chunk.sequence,
                              error = %e,
                              "replica fetch failed, trying next");
                    }
                }
            }

            if !written {
                discard_partial(output, local_path);
                return Err(Error::DownloadFailed(format!(
                    "every replica of chunk {} failed",
                    chunk.sequence
                )));
            }

            bytes_done += chunk.size;
            self.notify_progress(
                "Downloading chunks",
                u64::from(chunk.sequence) + 1,
                total_chunks,
                bytes_done,
                total_size,
            );
        }

        if let Err(e) = output.sync_all() {
            discard_partial(output, local_path);
            return Err(e.into());
        }
        drop(output);

        if self.config.always_verify_integrity {
            let actual = sha256_file(local_path)?;
            if !digests_equal(&actual, &manifest.file_hash) {
                let _ = std::fs::remove_file(local_path);
                return Err(Error::ChunkIntegrity(
                    "downloaded file does not match the manifest file hash".into(),
                ));
            }
        }

        let stats = OpStats {
            bytes_processed: bytes_done,
            chunks_processed: manifest.chunk_count(),
            servers_used: servers_used.len() as u32,
            elapsed_ms: started.elapsed().as_millis() as u64,
            retries,
        };
        self.notify_progress("Download complete", 1, 1, bytes_done, total_size);
        info!(
            remote_name,
            bytes = stats.bytes_processed,
            chunks = stats.chunks_processed,
            "download finished"
        );
        Ok(stats)
    }
}

/// Close and delete a partially written output file.
fn discard_partial(output: File, local_path: &Path) {
    drop(output);
    if let Err(e) = std::fs::remove_file(local_path) {
        warn!(path = %local_path.display(), error = %e, "partial output cleanup failed");
    }
}
