//! Domain types shared by every pipeline component.
//!
//! The serialized forms here are the wire format: broker messages carry a
//! JSON [`TransformationRequest`], and the status cache stores a JSON
//! [`TransformationStatus`]. Field names are camelCase on the wire.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Callback ID
// =============================================================================

/// Identifier of one enqueued transformation job.
///
/// It is minted by the producer and used both as the broker partition key
/// and as the status cache key. It has no relation to the image id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(Uuid);

impl CallbackId {
    /// Mint a fresh, random callback id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a callback id from a raw broker key.
    pub fn from_key(key: &[u8]) -> Option<Self> {
        let key = std::str::from_utf8(key).ok()?;
        key.parse().ok()
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CallbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CallbackId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for CallbackId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Operation Set
// =============================================================================

/// Target dimensions for a resize.
///
/// Both zero is a no-op. When only one side is zero it is derived from the
/// source aspect ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
}

impl Resize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns `true` when this resize leaves the image untouched.
    pub fn is_noop(&self) -> bool {
        self.width == 0 && self.height == 0
    }

    /// Compute the output dimensions for a source of `(src_width, src_height)`.
    ///
    /// Returns `None` for a no-op resize.
    pub fn target_dimensions(&self, src_width: u32, src_height: u32) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (0, 0) => None,
            (width, 0) => Some((width, scale_side(src_height, width, src_width))),
            (0, height) => Some((scale_side(src_width, height, src_height), height)),
            (width, height) => Some((width, height)),
        }
    }
}

/// Scale `side` by `target / reference`, rounding and never returning zero.
fn scale_side(side: u32, target: u32, reference: u32) -> u32 {
    let reference = u64::from(reference.max(1));
    let scaled = (u64::from(side) * u64::from(target) + reference / 2) / reference;
    scaled.clamp(1, u64::from(u32::MAX)) as u32
}

/// A rectangular crop anchored at `(x, y)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Crop {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

impl Crop {
    pub fn new(width: u32, height: u32, x: u32, y: u32) -> Self {
        Self {
            width,
            height,
            x,
            y,
        }
    }

    /// A crop only applies when both dimensions are strictly positive.
    ///
    /// A single positive dimension is treated as "no crop", not an error.
    pub fn is_active(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Color filters, applied grayscale first, then sepia.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub grayscale: bool,
    pub sepia: bool,
}

/// The ordered set of operations for one job.
///
/// Operations apply in a fixed order:
/// resize → crop → rotate → grayscale → sepia → encode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<Resize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<Crop>,

    /// Clockwise rotation in degrees.
    #[serde(default, rename = "rotate")]
    pub rotate_degrees: f64,

    /// Output format name, e.g. `png` or `jpg`. Required.
    #[serde(rename = "format")]
    pub target_format: String,

    #[serde(default)]
    pub filters: Filters,
}

impl OperationSet {
    /// An operation set that only re-encodes to `format`.
    pub fn encode_only(format: impl Into<String>) -> Self {
        Self {
            target_format: format.into(),
            ..Self::default()
        }
    }

    pub fn with_resize(mut self, width: u32, height: u32) -> Self {
        self.resize = Some(Resize::new(width, height));
        self
    }

    pub fn with_crop(mut self, width: u32, height: u32, x: u32, y: u32) -> Self {
        self.crop = Some(Crop::new(width, height, x, y));
        self
    }

    pub fn with_rotation(mut self, degrees: f64) -> Self {
        self.rotate_degrees = degrees;
        self
    }

    pub fn with_grayscale(mut self) -> Self {
        self.filters.grayscale = true;
        self
    }

    pub fn with_sepia(mut self) -> Self {
        self.filters.sepia = true;
        self
    }
}

// =============================================================================
// Transformation Request
// =============================================================================

/// A request to transform one stored image. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRequest {
    pub image_id: i64,
    pub user_id: Uuid,
    #[serde(rename = "transformations")]
    pub operations: OperationSet,
}

impl TransformationRequest {
    pub fn new(image_id: i64, user_id: Uuid, operations: OperationSet) -> Self {
        Self {
            image_id,
            user_id,
            operations,
        }
    }

    /// Check that the request is well-formed enough to publish.
    pub fn validate(&self) -> Result<(), String> {
        if self.operations.target_format.trim().is_empty() {
            return Err("transformations.format is required".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Transformation Status
// =============================================================================

/// Lifecycle state of a job as seen by pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Done,
    Failed,
}

impl JobState {
    /// `Done` and `Failed` are terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Latest known state of a job, stored in the status cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationStatus {
    #[serde(rename = "statusId")]
    pub status_id: CallbackId,

    #[serde(rename = "imageId")]
    pub image_id: i64,

    #[serde(rename = "status")]
    pub state: JobState,

    #[serde(rename = "error", default)]
    pub error_message: String,
}

impl TransformationStatus {
    pub fn pending(status_id: CallbackId, image_id: i64) -> Self {
        Self {
            status_id,
            image_id,
            state: JobState::Pending,
            error_message: String::new(),
        }
    }

    pub fn done(status_id: CallbackId, image_id: i64) -> Self {
        Self {
            status_id,
            image_id,
            state: JobState::Done,
            error_message: String::new(),
        }
    }

    pub fn failed(status_id: CallbackId, image_id: i64, message: impl Into<String>) -> Self {
        Self {
            status_id,
            image_id,
            state: JobState::Failed,
            error_message: message.into(),
        }
    }
}

// =============================================================================
// Persisted records
// =============================================================================

/// Persisted image metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: i64,
    pub user_id: Uuid,
    #[serde(rename = "imageUrl")]
    pub url: String,
    pub filename: String,
    pub format: String,
    pub alt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a successful transformation overwrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpdate {
    pub url: String,
    pub filename: String,
    pub format: String,
    pub alt: String,
}

/// Persisted user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
