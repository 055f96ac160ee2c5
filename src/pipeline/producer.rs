use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::broker::MessagePublisher;
use crate::error::EnqueueError;
use crate::model::{CallbackId, TransformationRequest, TransformationStatus};
use crate::status::StatusCache;

/// Accepts transformation requests and hands them to the broker.
///
/// Enqueueing is publish-then-record: the message is published first, then a
/// `pending` status is written under a freshly minted callback id. A publish
/// failure leaves no status behind. A status failure after a successful
/// publish is reported, but the job still runs.
#[derive(Clone)]
pub struct TransformationProducer {
    publisher: Arc<dyn MessagePublisher>,
    statuses: StatusCache,
}

impl TransformationProducer {
    pub fn new(publisher: Arc<dyn MessagePublisher>, statuses: StatusCache) -> Self {
        Self {
            publisher,
            statuses,
        }
    }

    pub fn statuses(&self) -> &StatusCache {
        &self.statuses
    }

    /// Publish `request` and record it as pending.
    ///
    /// Returns the pending status, whose `status_id` is the callback id
    /// callers poll with.
    #[instrument(skip_all, fields(image_id = request.image_id, user_id = %request.user_id))]
    pub async fn enqueue(
        &self,
        request: &TransformationRequest,
    ) -> Result<TransformationStatus, EnqueueError> {
        request.validate().map_err(EnqueueError::InvalidRequest)?;

        let payload =
            serde_json::to_vec(request).map_err(|e| EnqueueError::Serialization(e.to_string()))?;

        let callback_id = CallbackId::new();
        let key = callback_id.to_string();

        self.publisher.publish(key.as_bytes(), &payload).await?;

        let status = TransformationStatus::pending(callback_id, request.image_id);
        if let Err(source) = self.statuses.put(&status).await {
            warn!(callback_id = %callback_id, error = %source, "Job queued but pending status not recorded");
            return Err(EnqueueError::StatusWrite {
                callback_id,
                source,
            });
        }

        debug!(callback_id = %callback_id, "Transformation enqueued");
        Ok(status)
    }
}
