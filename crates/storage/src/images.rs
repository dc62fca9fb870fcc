//! Image validation and thumbnail derivation.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::error::StorageError;

/// Decode `bytes`, failing if they are not a supported image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, StorageError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Scale `img` down to at most `max_width` pixels wide and encode it as JPEG.
///
/// Narrower images are re-encoded at their original size.
pub fn thumbnail_jpeg(img: &DynamicImage, max_width: u32) -> Result<Vec<u8>, StorageError> {
    let scaled = if img.width() > max_width {
        img.resize(max_width, u32::MAX, FilterType::Triangle)
    } else {
        img.clone()
    };

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(scaled.to_rgb8()).write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}
