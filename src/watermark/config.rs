//! Watermark settings.
//!
//! This module defines the style and placement settings shared by the live
//! preview and the batch pipeline:
//! - Text or image mark, with graceful degradation between the two
//! - Five anchors (four corners plus center)
//! - Independent horizontal and vertical margins
//!
//! A `WatermarkSpec` is treated as an immutable snapshot for the duration of a
//! render; changing settings means building a new spec.

use super::text_renderer::{parse_hex_color, Color};
use super::WatermarkError;
use bytes::Bytes;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Default values
fn default_font_size() -> f32 {
    24.0
}

fn default_opacity() -> f32 {
    0.5
}

fn default_margin() -> u32 {
    10
}

/// Placement zone for the watermark.
///
/// Unrecognized names resolve to `Center` rather than failing, so persisted
/// settings from older versions always load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Anchor {
    TopLeft,
    TopRight,
    Center,
    BottomLeft,
    #[default]
    BottomRight,
}

impl Anchor {
    pub const ALL: [Anchor; 5] = [
        Anchor::TopLeft,
        Anchor::TopRight,
        Anchor::Center,
        Anchor::BottomLeft,
        Anchor::BottomRight,
    ];

    /// Parse an anchor name, falling back to `Center` for anything unknown.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "top-left" => Self::TopLeft,
            "top-right" => Self::TopRight,
            "bottom-left" => Self::BottomLeft,
            "bottom-right" => Self::BottomRight,
            _ => Self::Center,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopLeft => "top-left",
            Self::TopRight => "top-right",
            Self::Center => "center",
            Self::BottomLeft => "bottom-left",
            Self::BottomRight => "bottom-right",
        }
    }
}

impl From<String> for Anchor {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<Anchor> for String {
    fn from(anchor: Anchor) -> Self {
        anchor.as_str().to_string()
    }
}

impl std::fmt::Display for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which kind of mark the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkMode {
    #[default]
    Text,
    Image,
}

/// A decoded watermark image.
///
/// The raw upload is kept so it can be persisted; the decoded surface is
/// shared read-only between every render that uses this asset.
#[derive(Clone)]
pub struct WatermarkAsset {
    bytes: Bytes,
    decoded: Arc<RgbaImage>,
}

impl WatermarkAsset {
    /// Wrap an already-decoded surface together with its source bytes.
    pub fn from_decoded(bytes: Bytes, decoded: RgbaImage) -> Result<Self, WatermarkError> {
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(WatermarkError::InvalidAsset(
                "watermark image has no pixels".to_string(),
            ));
        }
        Ok(Self {
            bytes,
            decoded: Arc::new(decoded),
        })
    }

    /// Decode the asset synchronously.
    pub fn decode(bytes: Bytes) -> Result<Self, WatermarkError> {
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| WatermarkError::InvalidAsset(e.to_string()))?;
        Self::from_decoded(bytes, decoded.to_rgba8())
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn image(&self) -> &RgbaImage {
        &self.decoded
    }

    /// Width over height of the decoded surface.
    pub fn aspect_ratio(&self) -> f32 {
        self.decoded.width() as f32 / self.decoded.height() as f32
    }
}

impl std::fmt::Debug for WatermarkAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkAsset")
            .field("bytes", &self.bytes.len())
            .field("dimensions", &(self.decoded.width(), self.decoded.height()))
            .finish()
    }
}

impl PartialEq for WatermarkAsset {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

/// What a render will actually paint once fallbacks are applied.
#[derive(Debug, Clone, Copy)]
pub enum EffectiveMark<'a> {
    Image(&'a WatermarkAsset),
    Text(&'a str),
    Nothing,
}

/// Style and placement settings for one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkSpec {
    /// Text or image mark
    pub mode: MarkMode,

    /// Text to draw in text mode (empty means no text mark)
    pub text: String,

    /// Text size in pixels; also the height of an image mark (default: 24)
    pub font_size: f32,

    /// Fill color for text marks (default: "#FFFFFF")
    pub color: Color,

    /// Opacity from 0.0 (transparent) to 1.0 (opaque) (default: 0.5)
    pub opacity: f32,

    /// Placement zone (default: bottom-right)
    pub anchor: Anchor,

    /// Horizontal distance from the canvas edge to the mark (default: 10)
    pub margin_x: u32,

    /// Vertical distance from the canvas edge to the mark (default: 10)
    pub margin_y: u32,

    /// Uploaded watermark image, persisted separately from the settings
    #[serde(skip)]
    pub asset: Option<WatermarkAsset>,
}

impl Default for WatermarkSpec {
    fn default() -> Self {
        Self {
            mode: MarkMode::Text,
            text: String::new(),
            font_size: default_font_size(),
            color: Color::white(),
            opacity: default_opacity(),
            anchor: Anchor::default(),
            margin_x: default_margin(),
            margin_y: default_margin(),
            asset: None,
        }
    }
}

impl WatermarkSpec {
    /// Create a text spec with default styling.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_margins(mut self, margin_x: u32, margin_y: u32) -> Self {
        self.margin_x = margin_x;
        self.margin_y = margin_y;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_font_size(mut self, font_size: f32) -> Self {
        self.font_size = font_size;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    /// Attach an image asset and switch to image mode.
    pub fn with_asset(mut self, asset: WatermarkAsset) -> Self {
        self.asset = Some(asset);
        self.mode = MarkMode::Image;
        self
    }

    /// Drop the image asset and fall back to text mode.
    pub fn without_asset(mut self) -> Self {
        self.asset = None;
        self.mode = MarkMode::Text;
        self
    }

    /// Resolve the mark to paint.
    ///
    /// Image mode without an asset degrades to text; empty text paints nothing.
    pub fn effective_mark(&self) -> EffectiveMark<'_> {
        if self.mode == MarkMode::Image {
            if let Some(asset) = &self.asset {
                return EffectiveMark::Image(asset);
            }
        }
        if self.text.is_empty() {
            EffectiveMark::Nothing
        } else {
            EffectiveMark::Text(&self.text)
        }
    }

    /// Check the numeric settings a render depends on.
    pub fn check_numeric(&self) -> Result<(), WatermarkError> {
        // Check for NaN/Infinity and valid range
        if !self.opacity.is_finite() || !(0.0..=1.0).contains(&self.opacity) {
            return Err(WatermarkError::InvalidNumericSetting {
                field: "opacity",
                value: self.opacity,
            });
        }
        if !self.font_size.is_finite() || self.font_size <= 0.0 {
            return Err(WatermarkError::InvalidNumericSetting {
                field: "font_size",
                value: self.font_size,
            });
        }
        Ok(())
    }

    /// Replace the color from a hex string.
    pub fn set_color_hex(&mut self, hex: &str) -> Result<(), WatermarkError> {
        self.color = parse_hex_color(hex)?;
        Ok(())
    }
}
