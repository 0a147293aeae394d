// functions/src/transform.rs

//! Single-size resize of JPEG and PNG images.
//!
//! The output always has [`TARGET_WIDTH`] columns; the height follows the
//! source aspect ratio. Output is encoded in the same format as the input.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};

pub const TARGET_WIDTH: u32 = 300;

/// A target height of zero derives the height from the aspect ratio.
pub const TARGET_HEIGHT: u32 = 0;

const JPEG_QUALITY: u8 = 75;

/// Largest output, in pixels, the worker will allocate. A very tall, narrow
/// source would otherwise scale to billions of pixels.
pub const MAX_OUTPUT_PIXELS: u64 = 1 << 24;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode resized image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("resized image would be {width}x{height}, over {MAX_OUTPUT_PIXELS} pixels")]
    TooLarge { width: u32, height: u64 },
    #[error("resize task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Image formats the worker reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Jpeg,
    Png,
}

impl Format {
    /// Resolve a MIME content type, ignoring parameters and case.
    pub fn from_content_type(content_type: &str) -> Result<Self, TransformError> {
        let essence = content_type.split(';').next().unwrap_or_default().trim();

        if essence.eq_ignore_ascii_case("image/jpeg") {
            Ok(Format::Jpeg)
        } else if essence.eq_ignore_ascii_case("image/png") {
            Ok(Format::Png)
        } else {
            Err(TransformError::UnsupportedFormat(content_type.to_owned()))
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Format::Jpeg => ImageFormat::Jpeg,
            Format::Png => ImageFormat::Png,
        }
    }
}

/// Output dimensions for a `width` x `height` source. A zero target height is
/// derived from the source aspect ratio. Fails when the result exceeds
/// [`MAX_OUTPUT_PIXELS`].
pub fn target_dimensions(
    width: u32,
    height: u32,
    target_width: u32,
    target_height: u32,
) -> Result<(u32, u32), TransformError> {
    let scaled = if target_height != 0 {
        u64::from(target_height)
    } else {
        let derived = (f64::from(height) * f64::from(target_width) / f64::from(width.max(1))).round() as u64;
        derived.max(1)
    };

    let too_large = TransformError::TooLarge {
        width: target_width,
        height: scaled,
    };
    if u64::from(target_width).saturating_mul(scaled) > MAX_OUTPUT_PIXELS {
        return Err(too_large);
    }
    let new_height = u32::try_from(scaled).map_err(|_| too_large)?;

    Ok((target_width, new_height))
}

/// Decode, resize to [`TARGET_WIDTH`] and re-encode in the input format.
pub fn resize(data: &[u8], content_type: &str) -> Result<Vec<u8>, TransformError> {
    let format = Format::from_content_type(content_type)?;

    let img = image::load_from_memory_with_format(data, format.image_format()).map_err(TransformError::Decode)?;

    let (orig_w, orig_h) = img.dimensions();
    let (new_w, new_h) = target_dimensions(orig_w, orig_h, TARGET_WIDTH, TARGET_HEIGHT)?;

    tracing::debug!(
        original_width = orig_w,
        original_height = orig_h,
        width = new_w,
        height = new_h,
        "resizing image"
    );

    let resized = img.resize_exact(new_w, new_h, FilterType::Lanczos3);

    encode(&resized, format)
}

/// [`resize`] on the blocking thread pool.
pub async fn resize_blocking(data: bytes::Bytes, content_type: String) -> Result<Vec<u8>, TransformError> {
    tokio::task::spawn_blocking(move || resize(&data, &content_type)).await?
}

fn encode(img: &DynamicImage, format: Format) -> Result<Vec<u8>, TransformError> {
    let mut buf: Vec<u8> = Vec::new();

    match format {
        Format::Jpeg => {
            // jpeg has no alpha channel
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
                .encode_image(&rgb)
                .map_err(TransformError::Encode)?;
        }
        Format::Png => {
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
                .map_err(TransformError::Encode)?;
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    use super::*;

    fn test_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]));
        let img = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(img).to_rgb8()),
            _ => DynamicImage::ImageRgba8(img),
        };

        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).expect("encode test image");
        buf
    }

    #[test]
    fn resizes_jpeg() {
        let output = resize(&test_image(100, 100, ImageFormat::Jpeg), "image/jpeg").unwrap();
        assert!(!output.is_empty());

        let decoded = image::load_from_memory_with_format(&output, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (300, 300));
    }

    #[test]
    fn resizes_png_keeping_aspect_ratio() {
        let output = resize(&test_image(1200, 800, ImageFormat::Png), "image/png").unwrap();

        let decoded = image::load_from_memory_with_format(&output, ImageFormat::Png).unwrap();
        assert_eq!(decoded.dimensions(), (300, 200));
    }

    #[test]
    fn output_matches_input_format() {
        let output = resize(&test_image(640, 480, ImageFormat::Png), "image/png").unwrap();
        assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::Png);

        let output = resize(&test_image(640, 480, ImageFormat::Jpeg), "image/jpeg").unwrap();
        assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let output = resize(&test_image(50, 25, ImageFormat::Png), "Image/PNG; charset=binary").unwrap();
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!(decoded.dimensions(), (300, 150));
    }

    #[test]
    fn unsupported_content_type_fails() {
        let err = resize(&test_image(100, 100, ImageFormat::Png), "image/bmp").unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedFormat(_)));
    }

    #[test]
    fn garbage_fails_for_every_content_type() {
        for content_type in ["image/jpeg", "image/png", "image/bmp", ""] {
            assert!(resize(b"this is not an image", content_type).is_err(), "{content_type}");
        }
    }

    #[test]
    fn mismatched_content_type_fails_to_decode() {
        let err = resize(&test_image(100, 100, ImageFormat::Png), "image/jpeg").unwrap_err();
        assert!(matches!(err, TransformError::Decode(_)));
    }

    #[test]
    fn resize_is_deterministic() {
        let input = test_image(333, 97, ImageFormat::Jpeg);
        assert_eq!(resize(&input, "image/jpeg").unwrap(), resize(&input, "image/jpeg").unwrap());
    }

    #[test]
    fn target_dimensions_never_collapse() {
        assert_eq!(target_dimensions(10_000, 1, 300, 0).unwrap(), (300, 1));
        assert_eq!(target_dimensions(1, 2, 300, 0).unwrap(), (300, 600));
        assert_eq!(target_dimensions(800, 600, 300, 100).unwrap(), (300, 100));
    }

    #[test]
    fn target_dimensions_are_capped() {
        assert!(matches!(
            target_dimensions(1, 40_000, 300, 0),
            Err(TransformError::TooLarge {
                width: 300,
                height: 12_000_000
            })
        ));
        assert!(target_dimensions(1, u32::MAX, 300, 0).is_err());
        assert!(target_dimensions(300, 55_000, 300, 0).is_ok());
    }

    #[test]
    fn tall_narrow_image_is_rejected_before_resizing() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(1, 40_000, Luma([200])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).expect("encode test image");

        let err = resize(&buf, "image/png").unwrap_err();
        assert!(matches!(err, TransformError::TooLarge { width: 300, .. }));
    }

    #[tokio::test]
    async fn blocking_resize_matches_inline() {
        let input = test_image(64, 32, ImageFormat::Png);
        let inline = resize(&input, "image/png").unwrap();
        let blocking = resize_blocking(input.into(), "image/png".to_owned()).await.unwrap();
        assert_eq!(inline, blocking);
    }
}
