use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use super::BlobStore;
use crate::error::StorageError;

/// Filesystem-backed blob store rooted at a directory.
///
/// Parent directories are created on upload. Public URLs are
/// `{base_url}/{path}` when a base URL is configured, otherwise a
/// `file://` URL of the absolute location.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    base_url: Option<String>,
    identifier: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: Option<String>) -> Self {
        let root = root.into();
        let identifier = format!("file://{}", root.display());
        Self {
            root,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            identifier,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` under the root, rejecting anything that could escape it.
    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let escapes = path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));

        if escapes {
            return Err(StorageError::InvalidPath(path.to_string()));
        }

        Ok(self.root.join(relative))
    }

    fn url_for(&self, path: &str, full: &Path) -> String {
        match &self.base_url {
            Some(base) => format!("{}/{}", base, path),
            None => format!("file://{}", full.display()),
        }
    }

    fn map_io_error(err: std::io::Error, path: &str) -> StorageError {
        match err.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::Filesystem(format!("{}: {}", path, err)),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, data: Bytes, path: &str) -> Result<String, StorageError> {
        let full = self.full_path(path)?;

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io_error(e, path))?;
        }

        fs::write(&full, &data)
            .await
            .map_err(|e| Self::map_io_error(e, path))?;

        Ok(self.url_for(path, &full))
    }

    async fn download(&self, path: &str) -> Result<Bytes, StorageError> {
        let full = self.full_path(path)?;
        let data = fs::read(&full)
            .await
            .map_err(|e| Self::map_io_error(e, path))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.full_path(path)?;
        fs::remove_file(&full)
            .await
            .map_err(|e| Self::map_io_error(e, path))
    }

    async fn resolve_url(&self, path: &str) -> Result<String, StorageError> {
        let full = self.full_path(path)?;
        let metadata = fs::metadata(&full)
            .await
            .map_err(|e| Self::map_io_error(e, path))?;

        if !metadata.is_file() {
            return Err(StorageError::NotFound(path.to_string()));
        }

        Ok(self.url_for(path, &full))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
