//! Upload protocol: chunk the file, place each chunk on
//! `replication_factor` distinct servers, then commit the manifest.
//!
//! Per-chunk placement tolerates partial failure: as long as one replica
//! lands, the upload continues in degraded mode and repair tops it up
//! later. A chunk with zero replicas aborts the whole upload with a
//! best-effort rollback of everything placed so far.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::chunker::FileChunker;
use crate::engine::{Engine, OpStats};
use crate::error::{Error, Result};
use crate::manifest::{Manifest, Placement};
use crate::placement::rank_candidates;
use crate::transport::{chunk_path, DEFAULT_DEADLINE};

impl Engine {
    /// Upload `local_path` under the key `remote_name`.
    ///
    /// Ordering: chunks are produced and recorded in sequence order, and a
    /// chunk's placements are recorded in first-successful-put order. The
    /// manifest is committed only after the last chunk is fully placed.
    pub async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<OpStats> {
        let started = Instant::now();
        self.config.validate()?;
        // Fails fast on names that cannot become manifest objects.
        self.manifests.path_for(remote_name)?;

        let mut retries = 0u32;
        let mut servers_used: HashSet<String> = HashSet::new();

        self.notify_progress("Preparing upload", 0, 1, 0, 0);
        let mut chunker = FileChunker::open(local_path, self.config.chunk_size)?;
        let total_size = chunker.total_size();
        let total_chunks = chunker.chunk_count() as u64;

        let mut manifest = Manifest::new(
            remote_name,
            total_size,
            self.config.chunk_size,
            chunker.file_hash(),
            self.config.replication_factor,
            self.config.min_replicas_required,
        );

        let view = self.placement_view();
        let mut load: HashMap<String, u32> = HashMap::new();
        let mut bytes_done = 0u64;

        self.notify_progress("Uploading chunks", 0, total_chunks, 0, total_size);

        loop {
            let chunk_data = match chunker.next_chunk() {
                Ok(chunk_data) => chunk_data,
                Err(Error::ChunkerExhausted) => break,
                Err(e) => {
                    self.rollback_placements(&manifest).await;
                    return Err(e);
                }
            };
            let mut record = chunk_data.record;
            let payload = chunk_data.payload;

            let target = self.config.replication_factor;
            let mut achieved = 0u32;
            let placed: HashSet<String> = HashSet::new();

            for server_id in rank_candidates(&view, &load, &placed) {
                if achieved >= target {
                    break;
                }
                let Some(server) = self.config.server(&server_id) else { continue };
                let remote_path =
                    chunk_path(&server.base_path, &manifest.manifest_id, record.sequence, &record.id);

                let result = self
                    .with_retries(&mut retries, || {
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
                        record.add_location(Placement::new(server_id.clone(), remote_path))?;
                        *load.entry(server_id.clone()).or_insert(0) += 1;
                        servers_used.insert(server_id);
                        achieved += 1;
                    }
                    Err(Error::Cancelled) => {
                        let _ = manifest.add_chunk(record);
                        self.rollback_placements(&manifest).await;
                        return Err(Error::Cancelled);
                    }
                    Err(e) => {
                        warn!(server_id = %server_id, sequence = record.sequence, error = %e,
                              "chunk put failed, trying next candidate");
                    }
                }
            }

            if achieved == 0 {
                let sequence = record.sequence;
                let _ = manifest.add_chunk(record);
                self.rollback_placements(&manifest).await;
                return Err(Error::UploadFailed(format!(
                    "chunk {} could not be placed on any server",
                    sequence
                )));
            }
            if achieved < target {
                warn!(
                    sequence = record.sequence,
                    achieved,
                    target,
                    "chunk placed under-replicated, repair will top it up"
                );
            }

            bytes_done += record.size;
            manifest.add_chunk(record)?;
            self.notify_progress(
                "Uploading chunks",
                manifest.chunk_count() as u64,
                total_chunks,
                bytes_done,
                total_size,
            );

            // Payload dropped here; the buffer lives only for this chunk.
            drop(payload);
        }

        self.notify_progress("Saving manifest", 0, 1, bytes_done, total_size);
        let committed = self.commit_manifest(&manifest, &mut retries).await?;
        if committed == 0 {
            self.rollback_placements(&manifest).await;
            return Err(Error::UploadFailed(
                "manifest could not be written to any server".into(),
            ));
        }
        if let Err(e) = self.manifests.save(&manifest) {
            warn!(remote_name, error = %e, "local manifest cache write failed");
        }

        let stats = OpStats {
            bytes_processed: bytes_done,
            chunks_processed: manifest.chunk_count(),
            servers_used: servers_used.len() as u32,
            elapsed_ms: started.elapsed().as_millis() as u64,
            retries,
        };
        self.notify_progress("Upload complete", 1, 1, bytes_done, total_size);
        info!(
            remote_name,
            bytes = stats.bytes_processed,
            chunks = stats.chunks_processed,
            manifest_copies = committed,
            "upload finished"
        );
        Ok(stats)
    }
}
