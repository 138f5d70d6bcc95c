// Error types module

use crate::archive::ArchiveError;
use crate::codec::CodecError;
use crate::settings::SettingsError;
use crate::watermark::WatermarkError;
use thiserror::Error;

/// Centralized error type for the watermarking pipeline
///
/// Every variant is recoverable at the granularity of one file or one
/// settings field; none of them is fatal to the process.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A loaded file is not an image (the file is skipped, the batch continues)
    #[error("Unsupported file type for '{filename}': {media_type}")]
    UnsupportedFileType { filename: String, media_type: String },

    /// The watermark image could not be decoded (falls back to text mode)
    #[error("Invalid watermark image: {0}")]
    InvalidWatermarkAsset(String),

    /// Opacity or font size outside the renderable range
    #[error("Invalid value for {field}: {value}")]
    InvalidNumericSetting { field: &'static str, value: f32 },

    /// Export attempted with no images loaded
    #[error("No images to export")]
    EmptyBatch,

    /// A source image could not be decoded
    #[error("Failed to decode '{filename}': {message}")]
    DecodeFailure { filename: String, message: String },

    /// A composited image could not be encoded
    #[error("Failed to encode '{filename}': {message}")]
    EncodeFailure { filename: String, message: String },

    /// Requested image index does not exist
    #[error("No image at index {index} (collection holds {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Settings storage error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<WatermarkError> for PipelineError {
    fn from(err: WatermarkError) -> Self {
        match err {
            WatermarkError::InvalidAsset(msg) => PipelineError::InvalidWatermarkAsset(msg),
            WatermarkError::InvalidNumericSetting { field, value } => {
                PipelineError::InvalidNumericSetting { field, value }
            }
            WatermarkError::InvalidColor(msg) | WatermarkError::FontError(msg) => {
                PipelineError::Config(msg)
            }
        }
    }
}

impl PipelineError {
    /// Build a decode failure for a named file.
    pub fn decode(filename: impl Into<String>, err: CodecError) -> Self {
        PipelineError::DecodeFailure {
            filename: filename.into(),
            message: err.to_string(),
        }
    }

    /// Build an encode failure for a named file.
    pub fn encode(filename: impl Into<String>, err: CodecError) -> Self {
        PipelineError::EncodeFailure {
            filename: filename.into(),
            message: err.to_string(),
        }
    }
}
