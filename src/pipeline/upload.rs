use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{TransformError, UploadError};
use crate::model::Image;
use crate::repository::{ImageRepository, NewImage, UserRepository};
use crate::storage::{blob_path, BlobStore};
use crate::transform::{validate_upload, ImageCodec};

/// Caller-supplied description of an uploaded image.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageMetadata {
    pub filename: String,
    /// Declared format; the detected one is recorded when absent.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub alt: String,
}

/// Stores new images so they can be transformed later.
///
/// The bytes must decode, and decode as the declared format (`jpg`/`jpeg`
/// and `tif`/`tiff` are interchangeable). The blob is always written to
/// `{user_id}/{filename}`; when a record for that filename already exists
/// it is returned as is, otherwise a new one is created.
pub struct ImageUploader {
    images: Arc<dyn ImageRepository>,
    blobs: Arc<dyn BlobStore>,
    users: Option<Arc<dyn UserRepository>>,
}

impl ImageUploader {
    pub fn new(images: Arc<dyn ImageRepository>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            images,
            blobs,
            users: None,
        }
    }

    /// Require the uploading user to exist.
    pub fn with_users(mut self, users: Arc<dyn UserRepository>) -> Self {
        self.users = Some(users);
        self
    }

    #[instrument(skip_all, fields(user_id = %user_id, filename = %metadata.filename))]
    pub async fn upload(
        &self,
        user_id: Uuid,
        data: Bytes,
        metadata: ImageMetadata,
    ) -> Result<Image, UploadError> {
        if let Some(users) = &self.users {
            users.find_user_by_id(user_id).await.map_err(|err| {
                if err.is_not_found() {
                    UploadError::UserNotFound(user_id)
                } else {
                    UploadError::Repository(err)
                }
            })?;
        }

        check_filename(&metadata.filename)?;
        let format = self.check_image(data.clone(), metadata.format.clone()).await?;

        let path = blob_path(&user_id, &metadata.filename);
        let url = self.blobs.upload(data, &path).await?;
        debug!(path = %path, url = %url, "Stored uploaded image");

        match self
            .images
            .find_image_by_filename(&metadata.filename, user_id)
            .await
        {
            Ok(existing) => {
                debug!(image_id = existing.id, "Image already registered");
                return Ok(existing);
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        let image = self
            .images
            .create_image(NewImage {
                user_id,
                url,
                filename: metadata.filename,
                format,
                alt: metadata.alt,
            })
            .await?;

        info!(image_id = image.id, format = %image.format, "Image registered");
        Ok(image)
    }

    /// Decode on a blocking thread and return the format name to record.
    async fn check_image(
        &self,
        data: Bytes,
        declared: Option<String>,
    ) -> Result<String, UploadError> {
        tokio::task::spawn_blocking(move || {
            ImageCodec::new().decode(&data)?;
            match declared {
                Some(declared) => validate_upload(&data, &declared).map(|_| declared),
                None => Ok(ImageCodec::new().detect_format(&data)?.name().to_string()),
            }
        })
        .await
        .map_err(|e| TransformError::Aborted(e.to_string()))?
        .map_err(UploadError::from)
    }
}

/// A filename must be a single non-empty path segment.
fn check_filename(filename: &str) -> Result<(), UploadError> {
    if filename.trim().is_empty()
        || filename.contains(['/', '\\'])
        || filename == "."
        || filename == ".."
    {
        return Err(UploadError::InvalidMetadata(format!(
            "invalid filename {:?}",
            filename
        )));
    }
    Ok(())
}
