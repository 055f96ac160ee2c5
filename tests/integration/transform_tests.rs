//! Transform engine integration tests.
//!
//! Tests verify:
//! - Resize and crop geometry over encoded inputs
//! - Crop content matches the source region
//! - Every supported output format decodes back as itself
//! - Unsupported formats fail before any work is done
//! - Upload-side format validation

use image::{DynamicImage, GenericImageView, ImageFormat};

use imago_pipeline::error::TransformError;
use imago_pipeline::model::OperationSet;
use imago_pipeline::transform::{
    apply, validate_upload, ImageCodec, ImageTransformer, OutputFormat, SUPPORTED_FORMATS,
};

use super::test_utils::{create_test_image, create_test_png, create_test_rgba};

fn transformer() -> ImageTransformer {
    ImageTransformer::default()
}

fn output_dimensions(data: &[u8]) -> (u32, u32) {
    ImageCodec::new().dimensions(data).unwrap()
}

// =============================================================================
// Geometry
// =============================================================================

#[test]
fn test_zero_sized_operations_keep_dimensions() {
    let source = create_test_png(37, 23);
    let ops = OperationSet::encode_only("png")
        .with_resize(0, 0)
        .with_crop(0, 0, 5, 5)
        .with_crop(10, 0, 0, 0);

    let output = transformer().transform(&source, &ops).unwrap();
    assert_eq!(output_dimensions(&output), (37, 23));
}

#[test]
fn test_positive_resize_is_exact() {
    let source = create_test_png(64, 48);

    for (w, h) in [(10, 10), (100, 7), (1, 1), (64, 48)] {
        let ops = OperationSet::encode_only("png").with_resize(w, h);
        let output = transformer().transform(&source, &ops).unwrap();
        assert_eq!(output_dimensions(&output), (w, h), "resize to {}x{}", w, h);
    }
}

#[test]
fn test_resize_with_one_zero_side_keeps_aspect_ratio() {
    let source = create_test_png(200, 100);

    let ops = OperationSet::encode_only("png").with_resize(50, 0);
    let output = transformer().transform(&source, &ops).unwrap();
    assert_eq!(output_dimensions(&output), (50, 25));

    let ops = OperationSet::encode_only("png").with_resize(0, 10);
    let output = transformer().transform(&source, &ops).unwrap();
    assert_eq!(output_dimensions(&output), (20, 10));
}

#[test]
fn test_crop_matches_source_region() {
    let rgba = create_test_rgba(40, 30);
    let source = DynamicImage::ImageRgba8(rgba.clone());

    let ops = OperationSet::encode_only("png").with_crop(12, 8, 5, 9);
    let cropped = apply(source, &ops);

    assert_eq!(cropped.dimensions(), (12, 8));
    for y in 0..8 {
        for x in 0..12 {
            assert_eq!(cropped.get_pixel(x, y), *rgba.get_pixel(x + 5, y + 9));
        }
    }
}

#[test]
fn test_crop_survives_lossless_round_trip() {
    let rgba = create_test_rgba(40, 30);
    let source = create_test_png(40, 30);

    let ops = OperationSet::encode_only("png").with_crop(10, 10, 20, 15);
    let output = transformer().transform(&source, &ops).unwrap();

    let decoded = image::load_from_memory(&output).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (10, 10));
    assert_eq!(decoded.get_pixel(0, 0), rgba.get_pixel(20, 15));
    assert_eq!(decoded.get_pixel(9, 9), rgba.get_pixel(29, 24));
}

#[test]
fn test_resize_then_crop_order() {
    let source = create_test_png(100, 100);

    // Crop is applied to the resized image, so it must fit within 20x20
    let ops = OperationSet::encode_only("png")
        .with_resize(20, 20)
        .with_crop(10, 5, 10, 15);
    let output = transformer().transform(&source, &ops).unwrap();
    assert_eq!(output_dimensions(&output), (10, 5));
}

#[test]
fn test_rotation_keeps_canvas() {
    let source = create_test_png(30, 20);

    let ops = OperationSet::encode_only("png").with_rotation(45.0);
    let output = transformer().transform(&source, &ops).unwrap();
    assert_eq!(output_dimensions(&output), (30, 20));

    // Corners fall outside the rotated source and become transparent
    let decoded = image::load_from_memory(&output).unwrap().to_rgba8();
    assert_eq!(decoded.get_pixel(0, 0)[3], 0);
}

// =============================================================================
// Formats
// =============================================================================

#[test]
fn test_every_supported_format_round_trips() {
    let source = create_test_png(16, 12);

    for name in SUPPORTED_FORMATS {
        let ops = OperationSet::encode_only(*name);
        let output = transformer()
            .transform(&source, &ops)
            .unwrap_or_else(|e| panic!("encoding to {} failed: {}", name, e));

        let expected = OutputFormat::from_name(name).unwrap();
        let detected = ImageCodec::new().detect_format(&output).unwrap();
        assert_eq!(detected, expected, "format {}", name);
        assert_eq!(output_dimensions(&output), (16, 12), "format {}", name);
    }
}

#[test]
fn test_unsupported_format_is_rejected() {
    let source = create_test_png(8, 8);

    for name in ["xyz", "", "svg", "JPEG"] {
        let err = transformer()
            .transform(&source, &OperationSet::encode_only(name))
            .unwrap_err();
        assert!(
            matches!(err, TransformError::UnsupportedFormat { ref format } if format == name),
            "format {:?} gave {:?}",
            name,
            err
        );
        assert_eq!(err.to_string(), format!("unsupported file format: {}", name));
    }
}

#[test]
fn test_unsupported_format_wins_over_bad_input() {
    let err = transformer()
        .transform(b"definitely not an image", &OperationSet::encode_only("xyz"))
        .unwrap_err();
    assert!(matches!(err, TransformError::UnsupportedFormat { .. }));
}

#[test]
fn test_undecodable_input() {
    let err = transformer()
        .transform(b"definitely not an image", &OperationSet::encode_only("png"))
        .unwrap_err();
    assert!(matches!(err, TransformError::Decode { .. }));
}

#[test]
fn test_jpeg_input_is_accepted() {
    let source = create_test_image(24, 24, ImageFormat::Jpeg);
    let ops = OperationSet::encode_only("webp").with_sepia();

    let output = transformer().transform(&source, &ops).unwrap();
    assert_eq!(
        ImageCodec::new().detect_format(&output).unwrap(),
        OutputFormat::WebP
    );
}

// =============================================================================
// Upload Validation
// =============================================================================

#[test]
fn test_validate_upload_accepts_aliases() {
    let jpeg = create_test_image(8, 8, ImageFormat::Jpeg);
    assert!(validate_upload(&jpeg, "jpg").is_ok());
    assert!(validate_upload(&jpeg, "jpeg").is_ok());

    let tiff = create_test_image(8, 8, ImageFormat::Tiff);
    assert!(validate_upload(&tiff, "tif").is_ok());
}

#[test]
fn test_validate_upload_rejects_mismatch() {
    let png = create_test_png(8, 8);
    let err = validate_upload(&png, "gif").unwrap_err();
    assert!(matches!(err, TransformError::FormatMismatch { .. }));
}
