//! Image codec table.
//!
//! Maps output format names to encoders and decodes arbitrary supported
//! input formats.
//!
//! # Format Names
//!
//! The table is matched literally against the lowercase names below.
//! `jpg`/`jpeg` and `tif`/`tiff` are aliases for the same encoder.
//!
//! | Name            | Encoder          |
//! |-----------------|------------------|
//! | `jpeg`, `jpg`   | JPEG (quality)   |
//! | `png`           | PNG              |
//! | `gif`           | GIF              |
//! | `bmp`           | BMP              |
//! | `tiff`, `tif`   | TIFF             |
//! | `webp`          | WebP (lossless)  |
//!
//! JPEG cannot carry alpha, so images are flattened to RGB before encoding.
//! Every other encoder receives RGBA.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Frame, GenericImageView, ImageFormat, ImageReader};

use crate::error::TransformError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Every format name accepted as a transformation target.
pub const SUPPORTED_FORMATS: &[&str] = &["jpeg", "jpg", "png", "gif", "bmp", "tiff", "tif", "webp"];

// =============================================================================
// Output Format
// =============================================================================

/// An encoder selected from the codec table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
    WebP,
}

impl OutputFormat {
    /// Look up a format by name. Matching is exact; `"PNG"` is not `"png"`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "jpeg" | "jpg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "gif" => Some(OutputFormat::Gif),
            "bmp" => Some(OutputFormat::Bmp),
            "tiff" | "tif" => Some(OutputFormat::Tiff),
            "webp" => Some(OutputFormat::WebP),
            _ => None,
        }
    }

    /// Map a detected container format back into the table.
    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
            ImageFormat::Png => Some(OutputFormat::Png),
            ImageFormat::Gif => Some(OutputFormat::Gif),
            ImageFormat::Bmp => Some(OutputFormat::Bmp),
            ImageFormat::Tiff => Some(OutputFormat::Tiff),
            ImageFormat::WebP => Some(OutputFormat::WebP),
            _ => None,
        }
    }

    /// The canonical name, as reported by format detection.
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Gif => "gif",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Tiff => "tiff",
            OutputFormat::WebP => "webp",
        }
    }

    /// MIME type used when storing encoded blobs.
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Bmp => "image/bmp",
            OutputFormat::Tiff => "image/tiff",
            OutputFormat::WebP => "image/webp",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Gif => ImageFormat::Gif,
            OutputFormat::Bmp => ImageFormat::Bmp,
            OutputFormat::Tiff => ImageFormat::Tiff,
            OutputFormat::WebP => ImageFormat::WebP,
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Decodes source bytes and encodes transformed images.
#[derive(Debug, Clone)]
pub struct ImageCodec {
    jpeg_quality: u8,
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCodec {
    /// Create a codec using [`DEFAULT_JPEG_QUALITY`].
    pub fn new() -> Self {
        Self::with_quality(DEFAULT_JPEG_QUALITY)
    }

    /// Create a codec with a specific JPEG quality, clamped to 1-100.
    pub fn with_quality(quality: u8) -> Self {
        Self {
            jpeg_quality: clamp_quality(quality),
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Decode an image in any supported container format.
    pub fn decode(&self, source: &[u8]) -> Result<DynamicImage, TransformError> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| TransformError::Decode {
                message: e.to_string(),
            })?;

        reader.decode().map_err(|e| TransformError::Decode {
            message: e.to_string(),
        })
    }

    /// Detect the format of `source` from its magic bytes.
    pub fn detect_format(&self, source: &[u8]) -> Result<OutputFormat, TransformError> {
        let format = image::guess_format(source).map_err(|e| TransformError::Decode {
            message: e.to_string(),
        })?;

        OutputFormat::from_image_format(format).ok_or_else(|| TransformError::UnsupportedFormat {
            format: format!("{:?}", format).to_lowercase(),
        })
    }

    /// Get image dimensions without fully decoding.
    pub fn dimensions(&self, source: &[u8]) -> Result<(u32, u32), TransformError> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| TransformError::Decode {
                message: e.to_string(),
            })?;

        reader.into_dimensions().map_err(|e| TransformError::Decode {
            message: e.to_string(),
        })
    }

    /// Encode `img` with the encoder registered under `format_name`.
    ///
    /// The name is checked before any encoding work happens, so an unknown
    /// name never produces partial output.
    pub fn encode(&self, img: &DynamicImage, format_name: &str) -> Result<Bytes, TransformError> {
        let format =
            OutputFormat::from_name(format_name).ok_or_else(|| TransformError::UnsupportedFormat {
                format: format_name.to_string(),
            })?;

        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(TransformError::EmptyImage { width, height });
        }

        let encode_err = |e: image::ImageError| TransformError::Encode {
            message: e.to_string(),
        };

        let output = match format {
            OutputFormat::Jpeg => {
                let rgb = img.to_rgb8();
                let mut output = Vec::new();
                let mut encoder = JpegEncoder::new_with_quality(&mut output, self.jpeg_quality);
                encoder.encode_image(&rgb).map_err(encode_err)?;
                output
            }
            OutputFormat::Gif => {
                let mut output = Vec::new();
                {
                    let mut encoder = GifEncoder::new(&mut output);
                    encoder
                        .encode_frame(Frame::new(img.to_rgba8()))
                        .map_err(encode_err)?;
                }
                output
            }
            other => {
                let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
                let mut cursor = Cursor::new(Vec::new());
                rgba.write_to(&mut cursor, other.image_format())
                    .map_err(encode_err)?;
                cursor.into_inner()
            }
        };

        Ok(Bytes::from(output))
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Returns `true` if `name` is a known target format.
pub fn is_supported_format(name: &str) -> bool {
    OutputFormat::from_name(name).is_some()
}

/// Compare a declared format against a detected one, honoring aliases.
///
/// `jpg` matches `jpeg` and `tif` matches `tiff`, in either direction.
/// Comparison ignores ASCII case.
pub fn formats_equivalent(declared: &str, detected: &str) -> bool {
    let declared = declared.to_ascii_lowercase();
    let detected = detected.to_ascii_lowercase();

    if declared == detected {
        return true;
    }

    match (
        OutputFormat::from_name(&declared),
        OutputFormat::from_name(&detected),
    ) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Check that uploaded bytes really are in the declared format.
///
/// Returns the detected canonical format name on success.
pub fn validate_upload(source: &[u8], declared: &str) -> Result<&'static str, TransformError> {
    let detected = ImageCodec::new().detect_format(source)?;

    if !formats_equivalent(declared, detected.name()) {
        return Err(TransformError::FormatMismatch {
            declared: declared.to_string(),
            detected: detected.name().to_string(),
        });
    }

    Ok(detected.name())
}

/// Validate JPEG quality parameter.
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
