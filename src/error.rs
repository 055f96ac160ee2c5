use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::model::CallbackId;

/// Errors from blob storage backends
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Blob does not exist at the given path
    #[error("Blob not found: {0}")]
    NotFound(String),

    /// Local filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(String),

    /// Path escapes the store root or is otherwise unusable
    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    /// Operation did not finish within its deadline
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from decoding, transforming or encoding an image
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// Target format name is not in the codec table
    #[error("unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    /// Source bytes could not be decoded
    #[error("failed to decode image: {message}")]
    Decode { message: String },

    /// Encoder rejected the transformed image
    #[error("failed to encode image: {message}")]
    Encode { message: String },

    /// The operations produced an image with no pixels
    #[error("transformed image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// Declared upload format does not match the detected one
    #[error("declared format {declared:?} does not match detected format {detected:?}")]
    FormatMismatch { declared: String, detected: String },

    /// The blocking transform task panicked or was cancelled
    #[error("transform task aborted: {0}")]
    Aborted(String),
}

/// Errors from the image/user repository
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("image {id} not found for user {user_id}")]
    ImageNotFound { id: i64, user_id: Uuid },

    #[error("image {filename:?} not found for user {user_id}")]
    FilenameNotFound { filename: String, user_id: Uuid },

    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("database error: {0}")]
    Database(String),
}

impl RepositoryError {
    /// Returns `true` for lookups that found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepositoryError::ImageNotFound { .. }
                | RepositoryError::FilenameNotFound { .. }
                | RepositoryError::UserNotFound(_)
        )
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        RepositoryError::Database(err.to_string())
    }
}

/// Errors from the status cache
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command failed: {0}")]
    Command(String),

    #[error("status serialization failed: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

/// Errors from the message broker
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("failed to publish message: {0}")]
    Publish(String),

    #[error("failed to receive message: {0}")]
    Receive(String),

    #[error("failed to acknowledge message: {0}")]
    Ack(String),

    #[error("broker configuration error: {0}")]
    Configuration(String),

    /// The message stream has ended and will produce no more deliveries
    #[error("message stream closed")]
    Closed,
}

/// Errors returned to callers of the producer
#[derive(Debug, Clone, Error)]
pub enum EnqueueError {
    /// The request was rejected before anything was published
    #[error("invalid transformation request: {0}")]
    InvalidRequest(String),

    #[error("failed to serialize request: {0}")]
    Serialization(String),

    /// Nothing was published and no status was written
    #[error(transparent)]
    Publish(#[from] BrokerError),

    /// The job is queued, but its pending status could not be written
    #[error("job {callback_id} was queued but its status could not be recorded: {source}")]
    StatusWrite {
        callback_id: CallbackId,
        #[source]
        source: CacheError,
    },
}

/// Errors from storing a new image
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// The uploading user does not exist
    #[error("user {0} not found")]
    UserNotFound(Uuid),

    /// Filename or declared format is unusable
    #[error("invalid image metadata: {0}")]
    InvalidMetadata(String),

    /// Bytes do not decode, or decode as a different format than declared
    #[error("invalid image: {0}")]
    InvalidImage(#[from] TransformError),

    #[error("failed to store image: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to record image: {0}")]
    Repository(#[from] RepositoryError),
}

/// Errors that end one transformation job as `failed`
///
/// The `Display` text is what pollers see in the status `error` field.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("image not found: invalid image id {image_id} or user id {user_id}")]
    ImageNotFound { image_id: i64, user_id: Uuid },

    #[error("failed to download image: {0}")]
    Download(StorageError),

    #[error("failed to transform image: {0}")]
    Transform(#[from] TransformError),

    #[error("failed to upload image: {0}")]
    Upload(StorageError),

    #[error("failed to update image info: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for JobError {
    fn from(err: RepositoryError) -> Self {
        JobError::Repository(err)
    }
}
