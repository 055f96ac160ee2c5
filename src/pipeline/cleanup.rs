//! Detached blob cleanup.
//!
//! When a transformation changes an image's format, the blob under the old
//! name is orphaned. Deleting it is best-effort: the job has already
//! succeeded, so the delete runs on its own task with a deadline and its
//! failures are only logged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::error::StorageError;
use crate::storage::BlobStore;

/// Default deadline for one orphan delete.
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct CleanupFailure {
    path: String,
    error: StorageError,
}

/// Runs orphan deletes in the background.
///
/// Clones share the same tracker and error channel. [`shutdown`] waits for
/// every submitted delete and for the error log to drain.
///
/// [`shutdown`]: CleanupRunner::shutdown
#[derive(Clone)]
pub struct CleanupRunner {
    timeout: Duration,
    tracker: TaskTracker,
    errors: mpsc::UnboundedSender<CleanupFailure>,
    failures: Arc<AtomicUsize>,
    drain: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CleanupRunner {
    /// Create a runner. Must be called inside a Tokio runtime.
    pub fn new(timeout: Duration) -> Self {
        let (errors, mut rx) = mpsc::unbounded_channel::<CleanupFailure>();
        let tracker = TaskTracker::new();
        let failures = Arc::new(AtomicUsize::new(0));

        let drain = {
            let tracker = tracker.clone();
            let failures = failures.clone();
            tokio::spawn(async move {
                let log = |failure: CleanupFailure| {
                    failures.fetch_add(1, Ordering::SeqCst);
                    error!(path = %failure.path, error = %failure.error, "Failed to delete orphaned blob");
                };

                loop {
                    tokio::select! {
                        Some(failure) = rx.recv() => log(failure),
                        _ = tracker.wait() => break,
                    }
                }

                // Everything sent before the last task finished is buffered
                while let Ok(failure) = rx.try_recv() {
                    log(failure);
                }
            })
        };

        Self {
            timeout,
            tracker,
            errors,
            failures,
            drain: Arc::new(Mutex::new(Some(drain))),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of deletes that failed or timed out so far.
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Delete `path` from `store` on a detached task.
    ///
    /// Returns immediately. After [`shutdown`](Self::shutdown) the request is
    /// dropped.
    pub fn delete_detached(&self, store: Arc<dyn BlobStore>, path: String) {
        if self.tracker.is_closed() {
            debug!(path = %path, "Cleanup runner is shut down, skipping delete");
            return;
        }

        let timeout = self.timeout;
        let errors = self.errors.clone();

        self.tracker.spawn(async move {
            let result = match tokio::time::timeout(timeout, store.delete(&path)).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Timeout(timeout)),
            };

            match result {
                Ok(()) => debug!(path = %path, "Deleted orphaned blob"),
                Err(error) => {
                    let _ = errors.send(CleanupFailure { path, error });
                }
            }
        });
    }

    /// Stop accepting deletes and wait for the in-flight ones to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;

        if let Some(drain) = self.drain.lock().await.take() {
            let _ = drain.await;
        }
    }
}
