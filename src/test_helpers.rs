//! Shared test utilities for the pixel-relay test suite.
//!
//! Small synthetic images with known pixel values, plus an encoder that turns
//! them into wire buffers. Everything is generated in memory; no fixtures on
//! disk.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let png = encode_as(&gradient_rgba(7, 5), ImageFormat::Png);
//! let grid = decode(&png).unwrap();
//! assert_eq!(grid.dimensions(), (7, 5));
//! ```

use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;

use crate::types::ImageBuffer;

// =========================================================================
// Synthetic images
// =========================================================================

/// RGB gradient: red follows x, green follows y.
pub fn gradient_rgb(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(2).saturating_sub(1)) as u8,
            (y * 255 / height.max(2).saturating_sub(1)) as u8,
            128,
        ])
    }))
}

/// RGBA gradient with a varying alpha channel, so alpha handling is visible.
pub fn gradient_rgba(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (x * 40 % 256) as u8,
            (y * 40 % 256) as u8,
            ((x + y) * 20 % 256) as u8,
            (255 - (x * 10 + y * 10) % 200) as u8,
        ])
    }))
}

/// Every pixel distinct: red = `10 * x + y`, green = 0, blue = 0.
///
/// Reading red back after a transform tells you exactly which source pixel
/// landed where.
pub fn distinct_rgb(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| Rgb([(10 * x + y) as u8, 0, 0]))
}

/// Single-channel grid from row-major values.
pub fn luma_grid(width: u32, height: u32, values: &[u8]) -> GrayImage {
    assert_eq!(
        values.len(),
        (width * height) as usize,
        "luma_grid: expected {} values",
        width * height
    );
    GrayImage::from_raw(width, height, values.to_vec()).unwrap()
}

// =========================================================================
// Encoding
// =========================================================================

/// Encode an image into a wire buffer in the given container format.
pub fn encode_as(image: &DynamicImage, format: ImageFormat) -> ImageBuffer {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    ImageBuffer::new(out.into_inner())
}
