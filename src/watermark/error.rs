//! Watermark error types.
//!
//! Defines errors that can occur while preparing or drawing a watermark.

use std::fmt;

/// Errors that can occur during watermark rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum WatermarkError {
    /// The uploaded watermark image could not be decoded
    InvalidAsset(String),

    /// A numeric setting is outside its accepted range
    InvalidNumericSetting { field: &'static str, value: f32 },

    /// A color string could not be parsed
    InvalidColor(String),

    /// Failed to load or use a font
    FontError(String),
}

impl fmt::Display for WatermarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAsset(msg) => write!(f, "Invalid watermark image: {}", msg),
            Self::InvalidNumericSetting { field, value } => {
                write!(f, "Invalid value for {}: {}", field, value)
            }
            Self::InvalidColor(msg) => write!(f, "Invalid color: {}", msg),
            Self::FontError(msg) => write!(f, "Font error: {}", msg),
        }
    }
}

impl std::error::Error for WatermarkError {}
