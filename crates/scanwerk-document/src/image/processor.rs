// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor — decode, quarter-turn rotation, thumbnails, and PNG/JPEG
// encoding. Operates on in-memory images using the `image` crate.

use image::{DynamicImage, ImageFormat};
use scanwerk_core::error::ScanwerkError;
use tracing::{debug, instrument};

/// Image processing pipeline operating on a single in-memory image.
///
/// Transformations consume `self` and return a new `ImageProcessor`, so
/// operations chain:
///
/// ```ignore
/// let jpeg = ImageProcessor::from_bytes(&png)?
///     .rotate_quarter_turns(90)?
///     .thumbnail(320)
///     .to_jpeg_bytes(80)?;
/// ```
pub struct ImageProcessor {
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Create a processor from raw encoded bytes (JPEG, PNG, etc.).
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self, ScanwerkError> {
        let img = image::load_from_memory(data).map_err(|err| {
            ScanwerkError::Image(format!("failed to decode image: {}", err))
        })?;
        debug!(
            width = img.width(),
            height = img.height(),
            "Image decoded from bytes"
        );
        Ok(Self { image: img })
    }

    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Whether the image carries no colour information (luma only).
    pub fn is_grayscale(&self) -> bool {
        !self.image.color().has_color()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    // -- Transformations ------------------------------------------------------

    /// Rotate clockwise by a multiple of 90 degrees. Lossless.
    #[instrument(skip(self), fields(degrees))]
    pub fn rotate_quarter_turns(self, degrees: u16) -> Result<Self, ScanwerkError> {
        let image = match degrees % 360 {
            0 => self.image,
            90 => self.image.rotate90(),
            180 => self.image.rotate180(),
            270 => self.image.rotate270(),
            other => {
                return Err(ScanwerkError::InvalidArgument(format!(
                    "rotation must be a multiple of 90, got {other}"
                )));
            }
        };
        Ok(Self { image })
    }

    /// Downscale so the longer edge is at most `max_edge`, preserving aspect
    /// ratio. Images already small enough are left alone.
    pub fn thumbnail(self, max_edge: u32) -> Self {
        if self.image.width().max(self.image.height()) <= max_edge {
            return self;
        }
        let resized = self
            .image
            .resize(max_edge, max_edge, image::imageops::FilterType::Triangle);
        debug!(
            new_w = resized.width(),
            new_h = resized.height(),
            "Thumbnail resized"
        );
        Self { image: resized }
    }

    // -- Output ---------------------------------------------------------------

    /// Encode the current image as PNG bytes.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, ScanwerkError> {
        encode_to_format(&self.image, ImageFormat::Png)
    }

    /// Encode as baseline JPEG with the given quality (1-100). Luma images
    /// stay single-channel; everything else is flattened to RGB.
    pub fn to_jpeg_bytes(&self, quality: u8) -> Result<Vec<u8>, ScanwerkError> {
        let mut buffer = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        let result = if self.is_grayscale() {
            self.image.to_luma8().write_with_encoder(encoder)
        } else {
            self.image.to_rgb8().write_with_encoder(encoder)
        };
        result.map_err(|err| ScanwerkError::Image(format!("JPEG encoding failed: {}", err)))?;
        Ok(buffer)
    }
}

/// Encode a `DynamicImage` into the specified format, returning the raw bytes.
fn encode_to_format(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ScanwerkError> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    image
        .write_to(&mut cursor, format)
        .map_err(|err| ScanwerkError::Image(format!("image encoding failed: {}", err)))?;
    Ok(buffer)
}
