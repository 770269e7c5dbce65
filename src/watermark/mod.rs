//! Watermark pipeline
//!
//! Stamps viewer-identifying text onto a copy of a stored original. The
//! original bytes are only ever read; the stamped copy is returned to the
//! caller and never persisted.

use std::path::Path;

use thiserror::Error;

mod glyphs;
pub mod pdf;
pub mod raster;

/// Errors raised while stamping.
#[derive(Debug, Error)]
pub enum WatermarkError {
    /// The file extension has no stamping implementation.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The PDF could not be parsed or re-serialized.
    #[error("PDF error: {0}")]
    Pdf(String),

    /// The raster image could not be decoded or encoded.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking render task panicked or was cancelled.
    #[error("Render task failed: {0}")]
    Join(String),
}

impl From<lopdf::Error> for WatermarkError {
    fn from(e: lopdf::Error) -> Self {
        WatermarkError::Pdf(e.to_string())
    }
}

pub type WatermarkResult<T> = std::result::Result<T, WatermarkError>;

/// Raster encodings we can decode and re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Jpeg,
    Png,
    Webp,
}

impl RasterFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            RasterFormat::Jpeg => "image/jpeg",
            RasterFormat::Png => "image/png",
            RasterFormat::Webp => "image/webp",
        }
    }

    pub(crate) fn image_format(&self) -> image::ImageFormat {
        match self {
            RasterFormat::Jpeg => image::ImageFormat::Jpeg,
            RasterFormat::Png => image::ImageFormat::Png,
            RasterFormat::Webp => image::ImageFormat::WebP,
        }
    }
}

/// The content families the pipeline knows how to stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFamily {
    Pdf,
    Raster(RasterFormat),
}

impl ContentFamily {
    /// Picks the family from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> WatermarkResult<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Ok(ContentFamily::Pdf),
            "jpg" | "jpeg" => Ok(ContentFamily::Raster(RasterFormat::Jpeg)),
            "png" => Ok(ContentFamily::Raster(RasterFormat::Png)),
            "webp" => Ok(ContentFamily::Raster(RasterFormat::Webp)),
            other => Err(WatermarkError::UnsupportedFormat(format!(".{other}"))),
        }
    }

    /// Picks the family from a stored file path.
    pub fn from_path(path: impl AsRef<Path>) -> WatermarkResult<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| WatermarkError::UnsupportedFormat(path.display().to_string()))?;
        Self::from_extension(ext)
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ContentFamily::Pdf => "application/pdf",
            ContentFamily::Raster(format) => format.content_type(),
        }
    }

    /// Renders `text` onto a copy of `source`.
    pub fn stamp(&self, source: &[u8], text: &str) -> WatermarkResult<Vec<u8>> {
        match self {
            ContentFamily::Pdf => pdf::stamp(source, text),
            ContentFamily::Raster(format) => raster::stamp(source, text, *format),
        }
    }
}

/// Response content type for a stored file, by extension.
pub fn content_type_for(path: impl AsRef<Path>) -> &'static str {
    ContentFamily::from_path(path)
        .map(|family| family.content_type())
        .unwrap_or("application/octet-stream")
}
