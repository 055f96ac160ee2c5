//! Pixel operations.
//!
//! [`apply`] runs an [`OperationSet`] against a decoded image in the fixed
//! order resize → crop → rotate → grayscale → sepia. Every stage works on
//! RGBA so alpha survives until the encoder decides what to do with it.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

use crate::model::OperationSet;

/// Apply every operation in `ops`, in order, to `img`.
///
/// Format encoding is not part of this step.
pub fn apply(img: DynamicImage, ops: &OperationSet) -> DynamicImage {
    let mut img = img;

    if let Some(resize) = ops.resize {
        if let Some((width, height)) = resize.target_dimensions(img.width(), img.height()) {
            img = img.resize_exact(width, height, FilterType::Triangle);
        }
    }

    if let Some(crop) = ops.crop {
        if crop.is_active() {
            img = img.crop_imm(crop.x, crop.y, crop.width, crop.height);
        }
    }

    img = rotate(img, ops.rotate_degrees);

    if ops.filters.grayscale {
        img = DynamicImage::ImageRgba8(img.grayscale().to_rgba8());
    }

    if ops.filters.sepia {
        img = DynamicImage::ImageRgba8(sepia(&img.to_rgba8()));
    }

    img
}

// =============================================================================
// Rotation
// =============================================================================

/// Rotate clockwise by `degrees` about the image center.
///
/// The canvas keeps its original dimensions: corners that rotate out are
/// clipped and uncovered areas become transparent. Multiples of 360, and
/// non-finite angles, return the input unchanged.
pub fn rotate(img: DynamicImage, degrees: f64) -> DynamicImage {
    if !degrees.is_finite() {
        return img;
    }

    let normalized = degrees.rem_euclid(360.0);
    if normalized == 0.0 {
        return img;
    }

    let src = img.to_rgba8();
    let (width, height) = src.dimensions();
    if width == 0 || height == 0 {
        return DynamicImage::ImageRgba8(src);
    }

    let (sin, cos) = normalized.to_radians().sin_cos();
    let cx = f64::from(width) / 2.0;
    let cy = f64::from(height) / 2.0;

    let out = RgbaImage::from_fn(width, height, |x, y| {
        // Pixel centers, relative to the rotation center.
        let dx = f64::from(x) + 0.5 - cx;
        let dy = f64::from(y) + 0.5 - cy;

        // Inverse of a clockwise rotation in y-down coordinates.
        let sx = (cos * dx + sin * dy + cx - 0.5).round();
        let sy = (-sin * dx + cos * dy + cy - 0.5).round();

        if sx < 0.0 || sy < 0.0 || sx >= f64::from(width) || sy >= f64::from(height) {
            Rgba([0, 0, 0, 0])
        } else {
            *src.get_pixel(sx as u32, sy as u32)
        }
    });

    DynamicImage::ImageRgba8(out)
}

// =============================================================================
// Filters
// =============================================================================

/// Standard sepia tone matrix. Alpha is preserved.
pub fn sepia(img: &RgbaImage) -> RgbaImage {
    let mut out = img.clone();

    for pixel in out.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));

        let tr = 0.393 * r + 0.769 * g + 0.189 * b;
        let tg = 0.349 * r + 0.686 * g + 0.168 * b;
        let tb = 0.272 * r + 0.534 * g + 0.131 * b;

        *pixel = Rgba([to_channel(tr), to_channel(tg), to_channel(tb), a]);
    }

    out
}

fn to_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
