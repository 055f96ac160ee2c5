//! Per-message job execution.
//!
//! [`TransformationProcessor::process`] takes one [`Delivery`] from the queue
//! through to a terminal status:
//!
//! ```text
//! parse ──► find image ──► download ──► transform ──► upload ──► update record
//!                                                                    │
//!                               delete old blob (detached) ◄─ name changed?
//!                                                                    │
//!                                                        status: done | failed
//! ```
//!
//! Any step failing ends the job as `failed` with that step's error text.
//! The status write is the last action for a job. A message that cannot be
//! parsed gets no status at all: there is no trustworthy callback id to
//! write it under.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use super::cleanup::CleanupRunner;
use crate::broker::Delivery;
use crate::error::{JobError, TransformError};
use crate::model::{CallbackId, Image, ImageUpdate, TransformationRequest, TransformationStatus};
use crate::repository::ImageRepository;
use crate::status::StatusCache;
use crate::storage::{blob_path, change_extension, BlobStore};
use crate::transform::ImageTransformer;

/// Outcome of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The job ran and its terminal status was recorded.
    Completed(TransformationStatus),
    /// The job ran but its terminal status could not be written.
    StatusLost(TransformationStatus),
    /// The message could not be parsed and was dropped.
    Malformed,
}

impl ProcessOutcome {
    /// Whether the broker may forget this delivery.
    pub fn should_ack(&self) -> bool {
        !matches!(self, ProcessOutcome::StatusLost(_))
    }
}

/// Executes transformation jobs against shared collaborators.
pub struct TransformationProcessor {
    images: Arc<dyn ImageRepository>,
    blobs: Arc<dyn BlobStore>,
    statuses: StatusCache,
    transformer: ImageTransformer,
    cleanup: CleanupRunner,
}

impl TransformationProcessor {
    pub fn new(
        images: Arc<dyn ImageRepository>,
        blobs: Arc<dyn BlobStore>,
        statuses: StatusCache,
        transformer: ImageTransformer,
        cleanup: CleanupRunner,
    ) -> Self {
        Self {
            images,
            blobs,
            statuses,
            transformer,
            cleanup,
        }
    }

    pub fn cleanup(&self) -> &CleanupRunner {
        &self.cleanup
    }

    /// Handle one delivery end to end.
    pub async fn process(&self, delivery: &Delivery) -> ProcessOutcome {
        let Some((callback_id, request)) = parse_delivery(delivery) else {
            return ProcessOutcome::Malformed;
        };

        let status = match self.run(callback_id, &request).await {
            Ok(image) => {
                info!(
                    callback_id = %callback_id,
                    image_id = image.id,
                    url = %image.url,
                    "Transformation completed"
                );
                TransformationStatus::done(callback_id, request.image_id)
            }
            Err(err) => {
                warn!(callback_id = %callback_id, image_id = request.image_id, error = %err, "Transformation failed");
                TransformationStatus::failed(callback_id, request.image_id, err.to_string())
            }
        };

        match self.statuses.put(&status).await {
            Ok(()) => ProcessOutcome::Completed(status),
            Err(err) => {
                warn!(callback_id = %callback_id, error = %err, "Failed to record terminal status");
                ProcessOutcome::StatusLost(status)
            }
        }
    }

    /// Run every step of one job. Returns the updated image record.
    #[instrument(skip_all, fields(callback_id = %callback_id, image_id = request.image_id))]
    pub async fn run(
        &self,
        callback_id: CallbackId,
        request: &TransformationRequest,
    ) -> Result<Image, JobError> {
        let image = self
            .images
            .find_image_by_id(request.image_id, request.user_id)
            .await
            .map_err(|err| match err {
                e if e.is_not_found() => JobError::ImageNotFound {
                    image_id: request.image_id,
                    user_id: request.user_id,
                },
                e => JobError::Repository(e),
            })?;

        let source_path = blob_path(&image.user_id, &image.filename);
        let source = self
            .blobs
            .download(&source_path)
            .await
            .map_err(JobError::Download)?;
        debug!(path = %source_path, bytes = source.len(), "Downloaded source image");

        let output = self.transform(source, request).await?;

        let target_format = request.operations.target_format.clone();
        // Only a format change renames the blob
        let new_filename = if image.format != target_format {
            change_extension(&image.filename, &target_format)
        } else {
            image.filename.clone()
        };
        let new_path = blob_path(&image.user_id, &new_filename);

        let url = self
            .blobs
            .upload(output, &new_path)
            .await
            .map_err(JobError::Upload)?;
        debug!(path = %new_path, url = %url, "Uploaded transformed image");

        let updated = self
            .images
            .update_image(
                image.id,
                image.user_id,
                ImageUpdate {
                    url,
                    filename: new_filename,
                    format: target_format,
                    alt: image.alt.clone(),
                },
            )
            .await
            .map_err(JobError::Repository)?;

        // Same name means the upload already overwrote the original
        if new_path != source_path {
            self.cleanup.delete_detached(self.blobs.clone(), source_path);
        }

        Ok(updated)
    }

    /// Decode, apply and encode on a blocking thread.
    async fn transform(
        &self,
        source: Bytes,
        request: &TransformationRequest,
    ) -> Result<Bytes, JobError> {
        let transformer = self.transformer.clone();
        let ops = request.operations.clone();

        tokio::task::spawn_blocking(move || transformer.transform(&source, &ops))
            .await
            .map_err(|e| TransformError::Aborted(e.to_string()))?
            .map_err(JobError::from)
    }
}

/// Extract the callback id and request from a delivery.
///
/// Logs and returns `None` when either is unusable.
fn parse_delivery(delivery: &Delivery) -> Option<(CallbackId, TransformationRequest)> {
    let Some(callback_id) = delivery.key.as_deref().and_then(CallbackId::from_key) else {
        warn!(
            partition = delivery.partition,
            offset = delivery.offset,
            "Dropping message without a valid callback id"
        );
        return None;
    };

    match serde_json::from_slice::<TransformationRequest>(&delivery.payload) {
        Ok(request) => Some((callback_id, request)),
        Err(e) => {
            warn!(
                callback_id = %callback_id,
                offset = delivery.offset,
                error = %e,
                "Dropping malformed transformation request"
            );
            None
        }
    }
}
