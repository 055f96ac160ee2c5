//! Blob store and status cache integration tests.
//!
//! Tests verify:
//! - Local blob store round trips, URLs and path confinement
//! - Detached cleanup against a real directory
//! - Status cache overwrite and expiry semantics

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use imago_pipeline::error::StorageError;
use imago_pipeline::model::{CallbackId, TransformationStatus};
use imago_pipeline::pipeline::CleanupRunner;
use imago_pipeline::status::{MemoryStatusStore, StatusCache};
use imago_pipeline::storage::{BlobStore, LocalBlobStore};

// =============================================================================
// Local Blob Store
// =============================================================================

#[tokio::test]
async fn test_local_upload_download_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlobStore::new(dir.path(), Some("http://cdn.local/".to_string()));

    let url = store
        .upload(Bytes::from_static(b"pixels"), "u1/cat.png")
        .await
        .unwrap();
    assert_eq!(url, "http://cdn.local/u1/cat.png");
    assert!(dir.path().join("u1/cat.png").is_file());

    let data = store.download("u1/cat.png").await.unwrap();
    assert_eq!(&data[..], b"pixels");

    assert_eq!(store.resolve_url("u1/cat.png").await.unwrap(), url);

    store.delete("u1/cat.png").await.unwrap();
    assert!(matches!(
        store.download("u1/cat.png").await,
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        store.resolve_url("u1/cat.png").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_local_upload_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlobStore::new(dir.path(), None);

    store.upload(Bytes::from_static(b"v1"), "u/a.png").await.unwrap();
    let url = store.upload(Bytes::from_static(b"v2"), "u/a.png").await.unwrap();

    assert!(url.starts_with("file://"));
    assert!(url.ends_with("u/a.png"));
    assert_eq!(&store.download("u/a.png").await.unwrap()[..], b"v2");
}

#[tokio::test]
async fn test_local_rejects_escaping_paths() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlobStore::new(dir.path().join("root"), None);

    for path in ["../outside.png", "/etc/passwd", "u/../../x", ""] {
        let result = store.upload(Bytes::from_static(b"x"), path).await;
        assert!(
            matches!(result, Err(StorageError::InvalidPath(_))),
            "path {:?} should be rejected",
            path
        );
    }
    assert!(!dir.path().join("outside.png").exists());
}

#[tokio::test]
async fn test_local_delete_missing_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlobStore::new(dir.path(), None);

    assert!(matches!(
        store.delete("u/missing.png").await,
        Err(StorageError::NotFound(_))
    ));
}

// =============================================================================
// Cleanup Runner
// =============================================================================

#[tokio::test]
async fn test_cleanup_failures_do_not_block_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path(), None));
    store.upload(Bytes::from_static(b"x"), "u/old.png").await.unwrap();

    let runner = CleanupRunner::new(Duration::from_secs(5));
    runner.delete_detached(store.clone(), "u/old.png".to_string());
    runner.delete_detached(store.clone(), "u/never-existed.png".to_string());
    runner.shutdown().await;

    assert!(!dir.path().join("u/old.png").exists());
    assert_eq!(runner.failure_count(), 1);
}

// =============================================================================
// Status Cache
// =============================================================================

#[tokio::test]
async fn test_status_last_write_wins() {
    let cache = StatusCache::in_memory(Duration::from_secs(60));
    let id = CallbackId::new();

    cache.put(&TransformationStatus::pending(id, 3)).await.unwrap();
    cache.put(&TransformationStatus::done(id, 3)).await.unwrap();

    let status = cache.get(&id).await.unwrap().unwrap();
    assert_eq!(status, TransformationStatus::done(id, 3));
}

#[tokio::test(start_paused = true)]
async fn test_status_expires_after_ttl_and_refreshes_on_write() {
    let cache = StatusCache::new(
        Arc::new(MemoryStatusStore::new()),
        Duration::from_secs(10),
    );
    let id = CallbackId::new();

    cache.put(&TransformationStatus::pending(id, 1)).await.unwrap();
    tokio::time::advance(Duration::from_secs(8)).await;

    // A terminal write restarts the clock
    cache.put(&TransformationStatus::done(id, 1)).await.unwrap();
    tokio::time::advance(Duration::from_secs(8)).await;
    assert!(cache.get(&id).await.unwrap().is_some());

    tokio::time::advance(Duration::from_secs(3)).await;
    assert!(cache.get(&id).await.unwrap().is_none());
    assert!(cache.get_raw(&id.to_string()).await.unwrap().is_none());
}
