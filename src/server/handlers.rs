//! HTTP request handlers for the transformation API.
//!
//! # Endpoints
//!
//! - `POST /jobs` - Enqueue a transformation
//! - `GET /jobs/{callback_id}` - Poll a job's status
//! - `POST /users/{user_id}/images` - Upload an image
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{
    BrokerError, CacheError, EnqueueError, RepositoryError, TransformError, UploadError,
};
use crate::model::{Image, TransformationRequest, TransformationStatus};
use crate::pipeline::{ImageMetadata, ImageUploader, TransformationProducer};
use crate::repository::UserRepository;
use crate::status::StatusCache;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Publishes jobs and records their pending status
    pub producer: Arc<TransformationProducer>,

    /// Status cache read by the polling endpoint
    pub statuses: StatusCache,

    /// When set, the requesting user must exist before a job is enqueued
    pub users: Option<Arc<dyn UserRepository>>,

    /// When set, `POST /users/{user_id}/images` stores new images
    pub uploader: Option<Arc<ImageUploader>>,
}

impl AppState {
    pub fn new(producer: TransformationProducer) -> Self {
        let statuses = producer.statuses().clone();
        Self {
            producer: Arc::new(producer),
            statuses,
            users: None,
            uploader: None,
        }
    }

    /// Check user existence before enqueueing.
    pub fn with_users(mut self, users: Arc<dyn UserRepository>) -> Self {
        self.users = Some(users);
        self
    }

    /// Accept image uploads.
    pub fn with_uploader(mut self, uploader: ImageUploader) -> Self {
        self.uploader = Some(Arc::new(uploader));
        self
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Errors a handler can return.
#[derive(Debug)]
pub enum ApiError {
    /// Request body could not be parsed
    InvalidBody(String),
    Enqueue(EnqueueError),
    User(RepositoryError),
    Status(CacheError),
    StatusNotFound(String),
    /// Path or query parameters could not be parsed
    InvalidParameters(String),
    Upload(UploadError),
    UploadsDisabled,
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        ApiError::Upload(err)
    }
}

impl From<EnqueueError> for ApiError {
    fn from(err: EnqueueError) -> Self {
        ApiError::Enqueue(err)
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::Status(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::InvalidParameters(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidParameters(rejection.body_text())
    }
}

/// Convert handler errors to HTTP responses.
///
/// 4xx errors are logged at DEBUG level, 5xx errors at ERROR level.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            ApiError::InvalidBody(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }

            ApiError::Enqueue(EnqueueError::InvalidRequest(msg)) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }

            ApiError::Enqueue(EnqueueError::Serialization(msg)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("Failed to serialize request: {}", msg),
            ),

            ApiError::Enqueue(EnqueueError::Publish(err)) => match err {
                BrokerError::Configuration(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "broker_error",
                    err.to_string(),
                ),
                _ => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "broker_unavailable",
                    err.to_string(),
                ),
            },

            ApiError::Enqueue(EnqueueError::StatusWrite { callback_id, source }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "status_unavailable",
                format!(
                    "Job {} was queued, but its status could not be recorded: {}",
                    callback_id, source
                ),
            ),

            ApiError::User(err) if err.is_not_found() => {
                (StatusCode::NOT_FOUND, "user_not_found", err.to_string())
            }

            ApiError::User(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "repository_error",
                err.to_string(),
            ),

            ApiError::Status(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "status_unavailable",
                err.to_string(),
            ),

            ApiError::StatusNotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("No status for job {}", id),
            ),

            ApiError::InvalidParameters(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }

            ApiError::Upload(err) => match err {
                UploadError::UserNotFound(_) => {
                    (StatusCode::NOT_FOUND, "user_not_found", err.to_string())
                }
                UploadError::InvalidImage(TransformError::Aborted(_)) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    err.to_string(),
                ),
                UploadError::InvalidMetadata(_) | UploadError::InvalidImage(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_image", err.to_string())
                }
                UploadError::Storage(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    err.to_string(),
                ),
                UploadError::Repository(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "repository_error",
                    err.to_string(),
                ),
            },

            ApiError::UploadsDisabled => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Uploads are not enabled on this server".to_string(),
            ),
        };

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Enqueue a transformation.
///
/// # Endpoint
///
/// `POST /jobs`
///
/// # Request
///
/// ```json
/// {
///   "imageId": 12,
///   "userId": "6f1c1f0e-8d0a-4b77-9d6c-1f2a3b4c5d6e",
///   "transformations": {"resize": {"width": 200, "height": 0}, "format": "webp"}
/// }
/// ```
///
/// # Response
///
/// `202 Accepted` with the pending status; its `statusId` is the id to poll.
///
/// # Errors
///
/// - `400 Bad Request`: Malformed body or missing format
/// - `404 Not Found`: Unknown user
/// - `503 Service Unavailable`: Broker unavailable, nothing was queued
/// - `500 Internal Server Error`: Queued, but the status was not recorded
pub async fn enqueue_handler(
    State(state): State<AppState>,
    body: Result<Json<TransformationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransformationStatus>), ApiError> {
    let Json(request) = body?;

    if let Some(users) = &state.users {
        users
            .find_user_by_id(request.user_id)
            .await
            .map_err(ApiError::User)?;
    }

    let status = state.producer.enqueue(&request).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// Poll a job's status.
///
/// # Endpoint
///
/// `GET /jobs/{callback_id}`
///
/// # Response
///
/// `200 OK` with the stored status JSON, byte for byte:
/// ```json
/// {"statusId": "...", "imageId": 12, "status": "done", "error": ""}
/// ```
///
/// # Errors
///
/// - `404 Not Found`: Unknown or expired id
/// - `503 Service Unavailable`: Status cache unreachable
pub async fn status_handler(
    State(state): State<AppState>,
    Path(callback_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.statuses.get_raw(&callback_id).await? {
        Some(raw) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            raw,
        )
            .into_response()),
        None => Err(ApiError::StatusNotFound(callback_id)),
    }
}

/// Upload an image.
///
/// # Endpoint
///
/// `POST /users/{user_id}/images?filename=cat.png&format=png&alt=A%20cat`
///
/// The body is the raw image. `format` is optional and defaults to the
/// detected one.
///
/// # Response
///
/// `201 Created` with the image record. Uploading a filename the user already
/// has overwrites the blob and returns the existing record.
///
/// # Errors
///
/// - `400 Bad Request`: Bad filename, undecodable image or format mismatch
/// - `404 Not Found`: Unknown user, or uploads not enabled
/// - `413 Payload Too Large`: Body over the upload limit
pub async fn upload_handler(
    State(state): State<AppState>,
    user_id: Result<Path<Uuid>, PathRejection>,
    metadata: Result<Query<ImageMetadata>, QueryRejection>,
    body: Bytes,
) -> Result<(StatusCode, Json<Image>), ApiError> {
    let uploader = state.uploader.as_ref().ok_or(ApiError::UploadsDisabled)?;
    let Path(user_id) = user_id?;
    let Query(metadata) = metadata?;

    let image = uploader.upload(user_id, body, metadata).await?;
    Ok((StatusCode::CREATED, Json(image)))
}

/// Health check.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
