//! Byte buffer ↔ pixel grid conversion.
//!
//! | Step | Crate / function |
//! |---|---|
//! | Sniff format | `image::ImageReader::with_guessed_format` (magic bytes) |
//! | Decode | `ImageReader::decode` |
//! | Encode | `DynamicImage::write_to` with the format seen at decode time |
//!
//! Which formats work is decided by the `image` features in `Cargo.toml`;
//! [`supported_formats`] reports the compiled-in set.

use crate::types::ImageBuffer;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("image buffer is empty")]
    Empty,
    #[error("unrecognized image signature")]
    UnknownFormat,
    #[error("failed to decode {format:?} image: {source}")]
    Decode {
        format: ImageFormat,
        #[source]
        source: image::ImageError,
    },
    #[error("{format:?} image is truncated")]
    Truncated { format: ImageFormat },
    #[error("decoded {format:?} image has zero width or height")]
    ZeroSized { format: ImageFormat },
    #[error("failed to encode {format:?} image: {source}")]
    Encode {
        format: ImageFormat,
        #[source]
        source: image::ImageError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded image plus the container format it came from.
///
/// Width and height are always positive. The format is carried along so the
/// grid can be written back in the same format after a transform.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGrid {
    image: DynamicImage,
    format: ImageFormat,
}

impl PixelGrid {
    /// Wrap an already-decoded image. Zero-sized images are rejected.
    pub fn new(image: DynamicImage, format: ImageFormat) -> Result<Self, CodecError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(CodecError::ZeroSized { format });
        }
        Ok(Self { image, format })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    /// Build a new grid in the same format from a transformed image.
    pub(crate) fn derive(&self, image: DynamicImage) -> Self {
        Self {
            image,
            format: self.format,
        }
    }
}

/// Decode an encoded buffer, sniffing the format from its magic bytes.
pub fn decode(buffer: &ImageBuffer) -> Result<PixelGrid, CodecError> {
    if buffer.is_empty() {
        return Err(CodecError::Empty);
    }
    let reader = ImageReader::new(Cursor::new(buffer.as_bytes())).with_guessed_format()?;
    let format = reader.format().ok_or(CodecError::UnknownFormat)?;
    check_complete(buffer.as_bytes(), format)?;
    let image = reader
        .decode()
        .map_err(|source| CodecError::Decode { format, source })?;
    PixelGrid::new(image, format)
}

/// Reject inputs whose decoder would fill a missing tail instead of failing.
///
/// The JPEG decoder returns a partial image (grey below the cut) for a stream
/// that stops early, so a JPEG must end with its EOI marker. Trailing zero
/// padding after EOI is allowed. The other formats fail on their own.
fn check_complete(bytes: &[u8], format: ImageFormat) -> Result<(), CodecError> {
    const EOI: [u8; 2] = [0xFF, 0xD9];
    if format == ImageFormat::Jpeg {
        let end = bytes.iter().rposition(|&b| b != 0x00).map_or(0, |i| i + 1);
        if !bytes[..end].ends_with(&EOI) {
            return Err(CodecError::Truncated { format });
        }
    }
    Ok(())
}

/// Encode a grid in the format it was decoded from.
pub fn encode(grid: &PixelGrid) -> Result<ImageBuffer, CodecError> {
    let mut cursor = Cursor::new(Vec::new());
    grid.image
        .write_to(&mut cursor, grid.format)
        .map_err(|source| CodecError::Encode {
            format: grid.format,
            source,
        })?;
    Ok(ImageBuffer::new(cursor.into_inner()))
}

/// Formats that can be both decoded and re-encoded with the compiled-in features.
pub fn supported_formats() -> Vec<ImageFormat> {
    ImageFormat::all()
        .filter(|f| f.reading_enabled() && f.writing_enabled())
        .collect()
}
