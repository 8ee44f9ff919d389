//! Image validation ahead of fingerprinting.

use crate::config::ImageConfig;
use crate::{Error, Result};
use image::{ImageFormat, ImageReader};
use std::io::Cursor;

/// Header facts about an accepted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Detected container format.
    pub format: ImageFormat,
}

/// Gatekeeper for fetched images.
///
/// Rejects thumbnails (both sides below the minimums) and formats outside the
/// allow-list. Only the image header is read.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    min_width: u32,
    min_height: u32,
    allowed_formats: Vec<ImageFormat>,
}

impl ImagePreprocessor {
    /// Creates a preprocessor from image settings.
    ///
    /// Allow-list entries are file extensions (`jpg`, `jpeg`, `tif`, ...),
    /// case-insensitive. Unknown names are dropped with a warning;
    /// [`crate::config::DupwatchConfig::validate`] rejects them up front.
    #[must_use]
    pub fn new(config: &ImageConfig) -> Self {
        let mut allowed_formats = Vec::with_capacity(config.allowed_formats.len());
        for name in &config.allowed_formats {
            match ImageFormat::from_extension(name) {
                Some(format) if !allowed_formats.contains(&format) => allowed_formats.push(format),
                Some(_) => {},
                None => tracing::warn!(format = %name, "Ignoring unknown image format"),
            }
        }

        Self {
            min_width: config.min_width,
            min_height: config.min_height,
            allowed_formats,
        }
    }

    /// Validates raw image bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidImage`] if the format or dimensions cannot be read
    /// - [`Error::TooSmall`] if width and height are both below the minimums
    /// - [`Error::UnsupportedFormat`] if the format is not allowed
    pub fn validate(&self, bytes: &[u8]) -> Result<ImageInfo> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| Error::InvalidImage(e.to_string()))?;
        let format = reader
            .format()
            .ok_or_else(|| Error::InvalidImage("unrecognized image format".to_string()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| Error::InvalidImage(e.to_string()))?;

        // A long strip is fine; only images small in both directions are thumbnails.
        if width < self.min_width && height < self.min_height {
            return Err(Error::TooSmall { width, height });
        }

        if !self.allowed_formats.contains(&format) {
            return Err(Error::UnsupportedFormat(format_name(format).to_string()));
        }

        Ok(ImageInfo {
            width,
            height,
            format,
        })
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(&ImageConfig::default())
    }
}

/// Canonical extension of a format, for error text.
fn format_name(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("unknown")
}
