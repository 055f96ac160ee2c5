//! Blob storage for original and transformed image bytes.
//!
//! Blobs are addressed by a relative path of the form `{user_id}/{filename}`.
//! Each backend turns a path into a public URL; the URL is what gets
//! persisted on the image record.
//!
//! # Backends
//!
//! - [`S3BlobStore`]: AWS S3 or any S3-compatible service (MinIO, ...)
//! - [`LocalBlobStore`]: a directory tree on the local filesystem

mod local;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::StorageError;

pub use local::LocalBlobStore;
pub use s3::{create_s3_client, S3BlobStore};

/// Async blob storage.
///
/// Implementations must be safe to share across workers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` at `path`, replacing any existing blob. Returns the public URL.
    async fn upload(&self, data: Bytes, path: &str) -> Result<String, StorageError>;

    /// Read the full blob at `path`.
    async fn download(&self, path: &str) -> Result<Bytes, StorageError>;

    /// Remove the blob at `path`.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Public URL for an existing blob.
    ///
    /// Returns [`StorageError::NotFound`] when nothing is stored at `path`.
    async fn resolve_url(&self, path: &str) -> Result<String, StorageError>;

    /// Human-readable location of this store, for logging.
    fn identifier(&self) -> &str;
}

/// Blob path for a user's file.
pub fn blob_path(user_id: &Uuid, filename: &str) -> String {
    format!("{}/{}", user_id, filename)
}

/// Replace the extension of `filename` with `extension`.
///
/// Everything after the last `.` is dropped. A name without a dot gains one.
///
/// ```
/// use imago_pipeline::storage::change_extension;
///
/// assert_eq!(change_extension("cat.png", "jpg"), "cat.jpg");
/// assert_eq!(change_extension("archive.tar.gz", "webp"), "archive.tar.webp");
/// assert_eq!(change_extension("README", "png"), "README.png");
/// ```
pub fn change_extension(filename: &str, extension: &str) -> String {
    let base = match filename.rfind('.') {
        Some(idx) => &filename[..idx],
        None => filename,
    };
    format!("{}.{}", base, extension)
}
