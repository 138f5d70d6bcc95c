//! Raster decode/encode.
//!
//! Decoding and encoding are CPU-bound, so `RasterCodec` runs them on the
//! blocking pool and exposes them as async operations. Results may complete in
//! any order relative to issuance; callers guard publication themselves.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CodecError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Codec task failed: {0}")]
    Task(String),
}

/// A file handed to the pipeline by the picker.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub filename: String,
    pub media_type: String,
    pub bytes: Bytes,
}

impl SourceFile {
    pub fn new(filename: impl Into<String>, media_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            filename: filename.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, declaring its media type from the extension.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(filename, media_type_for_path(path), Bytes::from(bytes)))
    }
}

/// Whether a declared media type names an image.
pub fn is_image_media_type(media_type: &str) -> bool {
    media_type.trim().to_ascii_lowercase().starts_with("image/")
}

/// Media type for a path, judged by extension only.
pub fn media_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Detect image format from bytes or filename extension.
pub fn detect_format(data: &[u8], filename: &str) -> Result<ImageFormat, CodecError> {
    // Try to detect from magic bytes first
    if let Ok(format) = image::guess_format(data) {
        return Ok(format);
    }

    // Fall back to extension
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => Ok(ImageFormat::Png),
        "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
        "gif" => Ok(ImageFormat::Gif),
        "webp" => Ok(ImageFormat::WebP),
        _ => Err(CodecError::UnsupportedFormat(format!(
            "cannot determine format of '{}'",
            filename
        ))),
    }
}

/// Container to write for a source format; formats without an encoder use `fallback`.
pub fn output_format(source: ImageFormat, fallback: ImageFormat) -> ImageFormat {
    match source {
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif => source,
        _ => fallback,
    }
}

/// Parse a configured format name.
pub fn parse_format_name(name: &str) -> Option<ImageFormat> {
    ImageFormat::from_extension(name.trim().to_ascii_lowercase())
        .filter(|f| output_format(*f, ImageFormat::Bmp) == *f)
}

/// Encoder settings.
#[derive(Debug, Clone, Copy)]
pub struct EncodeSettings {
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Container used when the source format cannot be re-encoded
    pub fallback_format: ImageFormat,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            fallback_format: ImageFormat::Png,
        }
    }
}

/// Opaque async decode/encode capability.
#[async_trait]
pub trait ImageCodec: Send + Sync + 'static {
    /// Decode image bytes into a pixel surface.
    async fn decode(&self, data: Bytes) -> Result<DynamicImage, CodecError>;

    /// Encode a surface in the given container (or the configured fallback).
    async fn encode(&self, image: RgbaImage, format: ImageFormat) -> Result<Bytes, CodecError>;
}

/// `image`-crate codec running on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct RasterCodec {
    settings: EncodeSettings,
}

impl RasterCodec {
    pub fn new(settings: EncodeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> EncodeSettings {
        self.settings
    }
}

#[async_trait]
impl ImageCodec for RasterCodec {
    async fn decode(&self, data: Bytes) -> Result<DynamicImage, CodecError> {
        tokio::task::spawn_blocking(move || decode_sync(&data))
            .await
            .map_err(|e| CodecError::Task(e.to_string()))?
    }

    async fn encode(&self, image: RgbaImage, format: ImageFormat) -> Result<Bytes, CodecError> {
        let settings = self.settings;
        tokio::task::spawn_blocking(move || encode_sync(image, format, settings))
            .await
            .map_err(|e| CodecError::Task(e.to_string()))?
    }
}

/// Decode on the current thread.
pub fn decode_sync(data: &[u8]) -> Result<DynamicImage, CodecError> {
    image::load_from_memory(data).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encode on the current thread.
pub fn encode_sync(
    image: RgbaImage,
    format: ImageFormat,
    settings: EncodeSettings,
) -> Result<Bytes, CodecError> {
    let target = output_format(format, settings.fallback_format);
    let mut buffer = Cursor::new(Vec::new());

    match target {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut buffer, settings.jpeg_quality.clamp(1, 100));
            encoder
                .encode_image(&rgb)
                .map_err(|e| CodecError::Encode(e.to_string()))?;
        }
        other => {
            DynamicImage::ImageRgba8(image)
                .write_to(&mut buffer, other)
                .map_err(|e| CodecError::Encode(e.to_string()))?;
        }
    }

    Ok(Bytes::from(buffer.into_inner()))
}
