//! End-to-end engine scenarios over the in-memory blob store.

mod common;

use std::collections::HashSet;

use common::{
    chunk_objects, patterned, test_config, test_engine, total_objects, write_file, CHUNK_1M,
};
use netchunk_core::engine::Engine;
use netchunk_core::transport::MemoryBlobStore;
use std::sync::Arc;

/// S1: 2.5 MiB of 0xA5, chunk size 1 MiB, factor 2, three servers.
#[tokio::test]
async fn upload_places_replicas_and_download_restores() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b", "c"], 2, dir.path());

    let data = vec![0xA5u8; 5 * 512 * 1024];
    let source = write_file(dir.path(), "source.bin", &data);

    let stats = engine.upload(&source, "pattern.bin").await.unwrap();
    assert_eq!(stats.chunks_processed, 3);
    assert_eq!(stats.bytes_processed, data.len() as u64);
    assert_eq!(stats.retries, 0);

    // 3 chunks x 2 replicas + one manifest per server.
    assert_eq!(total_objects(&store, &["a", "b", "c"]), 6 + 3);

    let manifest = engine.fetch_manifest("pattern.bin").await.unwrap();
    assert_eq!(manifest.chunk_count(), 3);
    assert_eq!(manifest.chunks[0].size, CHUNK_1M);
    assert_eq!(manifest.chunks[1].size, CHUNK_1M);
    assert_eq!(manifest.chunks[2].size, CHUNK_1M / 2);
    for chunk in &manifest.chunks {
        assert_eq!(chunk.replica_count(), 2);
        let servers: HashSet<_> = chunk.placed_servers().into_iter().collect();
        assert_eq!(servers.len(), 2, "replicas must land on distinct servers");
    }

    let target = dir.path().join("restored.bin");
    let stats = engine.download("pattern.bin", &target).await.unwrap();
    assert_eq!(stats.chunks_processed, 3);
    assert_eq!(std::fs::read(&target).unwrap(), data);
}

/// Round-trip property over a non-repeating payload.
#[tokio::test]
async fn upload_download_round_trip_is_byte_exact() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _store) = test_engine(&["a", "b", "c"], 3, dir.path());

    let data = patterned(3 * CHUNK_1M as usize + 12345);
    let source = write_file(dir.path(), "source.bin", &data);
    engine.upload(&source, "mixed.bin").await.unwrap();

    let manifest = engine.fetch_manifest("mixed.bin").await.unwrap();
    // Full replication with no transport errors: exactly `factor` replicas.
    for chunk in &manifest.chunks {
        assert_eq!(chunk.replica_count(), 3);
    }

    let target = dir.path().join("out.bin");
    engine.download("mixed.bin", &target).await.unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), data);
}

/// S3: a corrupted replica is skipped and the download falls back.
#[tokio::test]
async fn download_falls_back_past_corrupt_replica() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b", "c"], 2, dir.path());

    let data = vec![0xA5u8; 5 * 512 * 1024];
    let source = write_file(dir.path(), "source.bin", &data);
    engine.upload(&source, "pattern.bin").await.unwrap();

    // Corrupt chunk 0's replica on whichever server holds it first.
    let manifest = engine.fetch_manifest("pattern.bin").await.unwrap();
    let placement = &manifest.chunks[0].locations[0];
    assert!(store.corrupt_object(&placement.server_id, &placement.remote_path));

    let target = dir.path().join("out.bin");
    engine.download("pattern.bin", &target).await.unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), data);
}

/// A server outage mid-fleet degrades the upload instead of failing it.
#[tokio::test]
async fn upload_tolerates_partial_replica_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b"], 2, dir.path());
    store.set_available("b", false);

    let data = patterned(CHUNK_1M as usize);
    let source = write_file(dir.path(), "source.bin", &data);
    engine.upload(&source, "degraded.bin").await.unwrap();

    let manifest = engine.fetch_manifest("degraded.bin").await.unwrap();
    assert_eq!(manifest.chunks[0].replica_count(), 1);

    let target = dir.path().join("out.bin");
    engine.download("degraded.bin", &target).await.unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), data);
}

/// Zero placed replicas for a chunk aborts the upload entirely.
#[tokio::test]
async fn upload_fails_when_no_server_accepts_a_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b"], 2, dir.path());
    store.set_available("a", false);
    store.set_available("b", false);

    let source = write_file(dir.path(), "source.bin", &patterned(CHUNK_1M as usize));
    let err = engine.upload(&source, "doomed.bin").await.unwrap_err();
    assert_eq!(err.short_str(), "upload failed");
    assert_eq!(total_objects(&store, &["a", "b"]), 0);
}

/// A failed manifest commit rolls back every placed chunk.
#[tokio::test]
async fn failed_manifest_commit_rolls_back_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b"], 2, dir.path());
    store.fail_put_matching("a", Some("/manifests/"));
    store.fail_put_matching("b", Some("/manifests/"));

    let source = write_file(dir.path(), "source.bin", &patterned(CHUNK_1M as usize + 7));
    let err = engine.upload(&source, "torn.bin").await.unwrap_err();
    assert_eq!(err.short_str(), "upload failed");

    // Rollback removed the chunk objects the upload had placed.
    assert!(chunk_objects(&store, "a").is_empty());
    assert!(chunk_objects(&store, "b").is_empty());
}

/// S4: replication factor above the server count fails before any write.
#[tokio::test]
async fn insufficient_servers_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryBlobStore::with_servers(["a", "b"]));
    let config = test_config(&["a", "b"], 3, &dir.path().join("manifests"));

    let err = Engine::new(config, store.clone()).unwrap_err();
    assert_eq!(err.short_str(), "insufficient servers");
    assert_eq!(total_objects(&store, &["a", "b"]), 0);
}

/// S5: an empty file stores, lists, verifies, and restores as empty.
#[tokio::test]
async fn empty_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b", "c"], 3, dir.path());

    let source = write_file(dir.path(), "empty.bin", b"");
    let stats = engine.upload(&source, "empty.bin").await.unwrap();
    assert_eq!(stats.chunks_processed, 0);
    assert_eq!(stats.bytes_processed, 0);

    let manifest = engine.fetch_manifest("empty.bin").await.unwrap();
    assert_eq!(manifest.chunk_count(), 0);
    assert_eq!(manifest.total_size, 0);
    // Only the three manifest copies exist.
    assert_eq!(total_objects(&store, &["a", "b", "c"]), 3);

    let target = dir.path().join("restored.bin");
    engine.download("empty.bin", &target).await.unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), Vec::<u8>::new());

    let stats = engine.verify("empty.bin", false).await.unwrap();
    assert_eq!(stats.chunks_verified, 0);
}

/// Boundary: a file of exactly k * chunk_size has a full final chunk.
#[tokio::test]
async fn exact_multiple_file_has_full_last_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _store) = test_engine(&["a", "b"], 2, dir.path());

    let data = patterned(2 * CHUNK_1M as usize);
    let source = write_file(dir.path(), "source.bin", &data);
    engine.upload(&source, "even.bin").await.unwrap();

    let manifest = engine.fetch_manifest("even.bin").await.unwrap();
    assert_eq!(manifest.chunk_count(), 2);
    assert_eq!(manifest.chunks[1].size, CHUNK_1M);
}

#[tokio::test]
async fn download_of_unknown_name_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _store) = test_engine(&["a"], 1, dir.path());

    let err = engine
        .download("never-stored", &dir.path().join("out.bin"))
        .await
        .unwrap_err();
    assert_eq!(err.short_str(), "not found");
    assert!(!dir.path().join("out.bin").exists());
}

/// All replicas of one chunk gone: the download fails and leaves no
/// partial output behind.
#[tokio::test]
async fn download_with_lost_chunk_removes_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b"], 2, dir.path());

    let data = patterned(2 * CHUNK_1M as usize + 9);
    let source = write_file(dir.path(), "source.bin", &data);
    engine.upload(&source, "holed.bin").await.unwrap();

    let manifest = engine.fetch_manifest("holed.bin").await.unwrap();
    for placement in &manifest.chunks[1].locations {
        assert!(store.drop_object(&placement.server_id, &placement.remote_path));
    }

    let target = dir.path().join("out.bin");
    let err = engine.download("holed.bin", &target).await.unwrap_err();
    assert_eq!(err.short_str(), "download failed");
    assert!(!target.exists());
}

#[tokio::test]
async fn list_deduplicates_across_servers() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _store) = test_engine(&["a", "b", "c"], 2, dir.path());

    for name in ["one.bin", "two.bin"] {
        let source = write_file(dir.path(), name, &patterned(CHUNK_1M as usize));
        engine.upload(&source, name).await.unwrap();
    }

    let manifests = engine.list().await.unwrap();
    let names: Vec<&str> = manifests.iter().map(|m| m.remote_name.as_str()).collect();
    assert_eq!(names, vec!["one.bin", "two.bin"]);
}

#[tokio::test]
async fn list_survives_an_unreachable_server() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b"], 2, dir.path());

    let source = write_file(dir.path(), "file.bin", &patterned(CHUNK_1M as usize));
    engine.upload(&source, "file.bin").await.unwrap();

    store.set_available("a", false);
    let manifests = engine.list().await.unwrap();
    assert_eq!(manifests.len(), 1);
}

#[tokio::test]
async fn delete_removes_replicas_and_manifests() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b", "c"], 2, dir.path());

    let source = write_file(dir.path(), "file.bin", &patterned(CHUNK_1M as usize * 2));
    engine.upload(&source, "file.bin").await.unwrap();
    assert!(total_objects(&store, &["a", "b", "c"]) > 0);

    engine.delete("file.bin").await.unwrap();
    assert_eq!(total_objects(&store, &["a", "b", "c"]), 0);

    let err = engine.fetch_manifest("file.bin").await.unwrap_err();
    assert_eq!(err.short_str(), "not found");
}

#[tokio::test]
async fn cancelled_upload_rolls_back_and_reports_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b"], 2, dir.path());

    engine.cancel_token().cancel();
    let source = write_file(dir.path(), "file.bin", &patterned(CHUNK_1M as usize));
    let err = engine.upload(&source, "file.bin").await.unwrap_err();
    assert_eq!(err.short_str(), "cancelled");
    assert_eq!(total_objects(&store, &["a", "b"]), 0);
}

/// A corrupt manifest copy on the first server is skipped in favour of a
/// valid copy elsewhere.
#[tokio::test]
async fn manifest_scan_skips_corrupt_copies() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b"], 2, dir.path());

    let source = write_file(dir.path(), "file.bin", &patterned(CHUNK_1M as usize));
    engine.upload(&source, "file.bin").await.unwrap();

    // Overwrite server a's manifest copy with garbage.
    let manifest_object = store
        .object_paths("a")
        .into_iter()
        .find(|p| p.contains("/manifests/"))
        .unwrap();
    store.drop_object("a", &manifest_object);
    use bytes::Bytes;
    use netchunk_core::transport::BlobStore;
    store
        .put("a", &manifest_object, Bytes::from_static(b"{ not json"), std::time::Duration::from_secs(5))
        .await
        .unwrap();

    let manifest = engine.fetch_manifest("file.bin").await.unwrap();
    assert_eq!(manifest.remote_name, "file.bin");
}

/// Transport retries recover from transient faults and are counted.
#[tokio::test(start_paused = true)]
async fn transient_faults_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryBlobStore::with_servers(["a"]));
    let mut config = test_config(&["a"], 1, &dir.path().join("manifests"));
    config.max_retry_attempts = 3;
    let engine = Engine::new(config, store.clone()).unwrap();

    store.fail_next("a", 1);
    let source = write_file(dir.path(), "file.bin", &patterned(CHUNK_1M as usize));
    let stats = engine.upload(&source, "file.bin").await.unwrap();
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.chunks_processed, 1);
}

#[tokio::test]
async fn health_check_reports_per_server_status() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b", "c"], 2, dir.path());
    store.set_available("c", false);

    let servers = engine.health_check().await.unwrap();
    assert_eq!(servers.len(), 3);

    use netchunk_core::health::ServerStatus;
    let healthy: Vec<&str> = servers
        .iter()
        .filter(|s| s.status == ServerStatus::Available)
        .map(|s| s.id.as_str())
        .collect();
    assert_eq!(healthy, vec!["a", "b"]);
}

/// After an outage is observed by a health check, the placer avoids the
/// down server but the upload still succeeds on the rest.
#[tokio::test]
async fn placer_avoids_servers_marked_down() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = test_engine(&["a", "b", "c"], 2, dir.path());
    store.set_available("c", false);
    engine.health_check().await.unwrap();

    let source = write_file(dir.path(), "file.bin", &patterned(CHUNK_1M as usize));
    engine.upload(&source, "file.bin").await.unwrap();

    let manifest = engine.fetch_manifest("file.bin").await.unwrap();
    for chunk in &manifest.chunks {
        assert!(!chunk.has_location("c"));
        assert_eq!(chunk.replica_count(), 2);
    }
    // No placement traffic ever reached the down server.
    assert_eq!(store.counters("c").uploads, 0);
}

/// Error: sending a local path that does not exist.
#[tokio::test]
async fn upload_of_missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _store) = test_engine(&["a"], 1, dir.path());

    let err = engine
        .upload(&dir.path().join("ghost.bin"), "ghost.bin")
        .await
        .unwrap_err();
    assert_eq!(err.short_str(), "not found");
}
