//! Image transformation engine.
//!
//! ```text
//! source bytes ──► decode ──► resize ──► crop ──► rotate ──► grayscale ──► sepia ──► encode
//! ```
//!
//! # Components
//!
//! - [`ImageTransformer`]: decode → apply → encode in one call
//! - [`ImageCodec`]: the format table and the encoders behind it
//! - [`apply`]: pixel operations on an already decoded image
//! - [`formats_equivalent`] / [`validate_upload`]: upload format checks
//!
//! Transformation is CPU-bound. Async callers should run
//! [`ImageTransformer::transform`] on a blocking thread.

mod codec;
mod engine;

use bytes::Bytes;

use crate::error::TransformError;
use crate::model::OperationSet;

pub use codec::{
    clamp_quality, formats_equivalent, is_supported_format, is_valid_quality, validate_upload,
    ImageCodec, OutputFormat, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
    SUPPORTED_FORMATS,
};
pub use engine::{apply, rotate, sepia};

/// Runs a full transformation on encoded bytes.
#[derive(Debug, Clone, Default)]
pub struct ImageTransformer {
    codec: ImageCodec,
}

impl ImageTransformer {
    pub fn new(codec: ImageCodec) -> Self {
        Self { codec }
    }

    pub fn with_jpeg_quality(quality: u8) -> Self {
        Self::new(ImageCodec::with_quality(quality))
    }

    pub fn codec(&self) -> &ImageCodec {
        &self.codec
    }

    /// Decode `source`, apply `ops`, and encode to `ops.target_format`.
    ///
    /// An unknown target format is reported before the source is decoded.
    pub fn transform(&self, source: &[u8], ops: &OperationSet) -> Result<Bytes, TransformError> {
        if !is_supported_format(&ops.target_format) {
            return Err(TransformError::UnsupportedFormat {
                format: ops.target_format.clone(),
            });
        }

        let img = self.codec.decode(source)?;
        let img = apply(img, ops);
        self.codec.encode(&img, &ops.target_format)
    }
}
