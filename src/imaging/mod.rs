//! Image handling, pure Rust on top of the `image` crate.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` with format sniffing |
//! | **Encode** | `DynamicImage::write_to`, same format as the input |
//! | **Rotate** | `DynamicImage::rotate90/180/270` (lossless quarter turns) |
//! | **Mean filter** | 3×3 clamped box average, rows in parallel via `rayon` |
//!
//! The module is split into:
//! - **Codec**: [`decode`] / [`encode`] between
//!   [`ImageBuffer`](crate::types::ImageBuffer) and [`PixelGrid`]
//! - **Transform**: [`rotate`] and [`mean_filter`], pure functions over a grid

pub mod codec;
pub mod transform;

pub use codec::{CodecError, PixelGrid, decode, encode, supported_formats};
pub use transform::{mean_filter, rotate};
