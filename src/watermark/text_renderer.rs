//! Text watermark rendering.
//!
//! This module measures and rasterizes text marks into RGBA images that the
//! compositor blends onto the output surface.
//!
//! # Glyph sources
//!
//! - **Bitmap** (default): embedded 8x8 glyphs scaled so every character is
//!   `font_size` pixels wide and tall. Needs no font files and renders
//!   identically everywhere.
//! - **Outline**: any TrueType/OpenType font loaded at startup, with kerning.
//!
//! Both report the measured advance width as the mark width and `font_size` as
//! the mark height.

use super::WatermarkError;
use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parsed RGBA color from hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Opaque color.
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn with_alpha(mut self, a: u8) -> Self {
        self.a = a;
        self
    }

    /// White color.
    pub fn white() -> Self {
        Self::new(255, 255, 255)
    }

    /// Black color.
    pub fn black() -> Self {
        Self::new(0, 0, 0)
    }

    /// Format as `#RRGGBB`, or `#RRGGBBAA` when not fully opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        }
    }
}

impl TryFrom<String> for Color {
    type Error = WatermarkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_hex_color(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

/// Parse a hex color string into RGBA components.
///
/// Supports #RGB, #RRGGBB and #RRGGBBAA formats.
pub fn parse_hex_color(hex: &str) -> Result<Color, WatermarkError> {
    let digits = hex
        .strip_prefix('#')
        .ok_or_else(|| WatermarkError::InvalidColor(format!("'{}' must start with '#'", hex)))?;

    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(WatermarkError::InvalidColor(format!(
            "'{}' contains non-hex characters",
            hex
        )));
    }

    let channel = |range: std::ops::Range<usize>| -> Result<u8, WatermarkError> {
        u8::from_str_radix(&digits[range], 16)
            .map_err(|_| WatermarkError::InvalidColor(format!("invalid hex digit in '{}'", hex)))
    };

    match digits.len() {
        3 => {
            // Double each component: 0xF -> 0xFF, 0xA -> 0xAA
            Ok(Color::new(
                channel(0..1)? * 17,
                channel(1..2)? * 17,
                channel(2..3)? * 17,
            ))
        }
        6 => Ok(Color::new(channel(0..2)?, channel(2..4)?, channel(4..6)?)),
        8 => Ok(Color::new(channel(0..2)?, channel(2..4)?, channel(4..6)?).with_alpha(channel(6..8)?)),
        n => Err(WatermarkError::InvalidColor(format!(
            "'{}' must be #RGB, #RRGGBB or #RRGGBBAA, got {} digits",
            hex, n
        ))),
    }
}

/// Where glyph shapes come from.
#[derive(Clone, Default)]
pub enum GlyphSource {
    /// Embedded 8x8 bitmap font
    #[default]
    Bitmap,
    /// Outline font loaded from disk
    Outline(FontArc),
}

impl std::fmt::Debug for GlyphSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitmap => f.write_str("Bitmap"),
            Self::Outline(font) => f
                .debug_struct("Outline")
                .field("glyphs", &font.glyph_count())
                .finish(),
        }
    }
}

impl GlyphSource {
    /// Load an outline font from a TTF/OTF file.
    pub fn from_font_file(path: &Path) -> Result<Self, WatermarkError> {
        let data = std::fs::read(path)
            .map_err(|e| WatermarkError::FontError(format!("{}: {}", path.display(), e)))?;
        let font = FontArc::try_from_vec(data)
            .map_err(|e| WatermarkError::FontError(format!("{}: {}", path.display(), e)))?;
        Ok(Self::Outline(font))
    }
}

/// Measures and rasterizes single-line text marks.
#[derive(Debug, Clone, Default)]
pub struct TextRenderer {
    source: GlyphSource,
}

impl TextRenderer {
    pub fn new(source: GlyphSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &GlyphSource {
        &self.source
    }

    /// Advance width of `text` at `font_size`, in pixels.
    pub fn measure(&self, text: &str, font_size: f32) -> f32 {
        match &self.source {
            GlyphSource::Bitmap => text.chars().count() as f32 * font_size,
            GlyphSource::Outline(font) => {
                let scaled = font.as_scaled(PxScale::from(font_size));
                let mut width = 0.0f32;
                let mut prev_glyph: Option<ab_glyph::GlyphId> = None;
                for c in text.chars() {
                    let glyph_id = scaled.glyph_id(c);
                    if let Some(prev) = prev_glyph {
                        width += scaled.kern(prev, glyph_id);
                    }
                    width += scaled.h_advance(glyph_id);
                    prev_glyph = Some(glyph_id);
                }
                width
            }
        }
    }

    /// Rasterize `text` onto a transparent image of `ceil(width) x ceil(font_size)`.
    ///
    /// Covered pixels carry `color`, with alpha scaled by glyph coverage.
    pub fn rasterize(&self, text: &str, font_size: f32, color: Color) -> RgbaImage {
        let width = (self.measure(text, font_size).ceil() as u32).max(1);
        let height = (font_size.ceil() as u32).max(1);
        let mut image = RgbaImage::new(width, height);

        match &self.source {
            GlyphSource::Bitmap => draw_bitmap_text(&mut image, text, font_size, color),
            GlyphSource::Outline(font) => draw_outline_text(&mut image, font, text, font_size, color),
        }

        image
    }
}

fn glyph_bits(c: char) -> [u8; 8] {
    BASIC_FONTS
        .get(c)
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

/// Nearest-neighbour scale each 8x8 glyph into a `font_size` square cell.
fn draw_bitmap_text(image: &mut RgbaImage, text: &str, font_size: f32, color: Color) {
    let (width, height) = image.dimensions();
    let cell = font_size / 8.0;

    for (index, c) in text.chars().enumerate() {
        let bits = glyph_bits(c);
        let x0 = index as f32 * font_size;
        let px_start = x0.floor().max(0.0) as u32;
        let px_end = ((x0 + font_size).ceil() as u32).min(width);

        for py in 0..height {
            let row = ((py as f32 + 0.5) / cell) as usize;
            if row > 7 {
                continue;
            }
            for px in px_start..px_end {
                let local = px as f32 + 0.5 - x0;
                if local < 0.0 || local >= font_size {
                    continue;
                }
                let col = ((local / cell) as usize).min(7);
                if (bits[row] >> col) & 1 == 1 {
                    image.put_pixel(px, py, Rgba([color.r, color.g, color.b, color.a]));
                }
            }
        }
    }
}

/// Lay glyphs out on one baseline, vertically centered inside the image.
fn draw_outline_text(image: &mut RgbaImage, font: &FontArc, text: &str, font_size: f32, color: Color) {
    let (width, height) = image.dimensions();
    let scale = PxScale::from(font_size);
    let scaled = font.as_scaled(scale);

    let text_height = scaled.ascent() - scaled.descent();
    let baseline_y = (height as f32 - text_height) / 2.0 + scaled.ascent();

    let mut cursor_x = 0.0f32;
    let mut prev_glyph: Option<ab_glyph::GlyphId> = None;

    for c in text.chars() {
        let glyph_id = scaled.glyph_id(c);
        if let Some(prev) = prev_glyph {
            cursor_x += scaled.kern(prev, glyph_id);
        }

        let glyph = glyph_id.with_scale_and_position(scale, ab_glyph::point(cursor_x, baseline_y));
        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            outlined.draw(|px, py, coverage| {
                let x = px as i32 + bounds.min.x as i32;
                let y = py as i32 + bounds.min.y as i32;
                if x >= 0 && y >= 0 && x < width as i32 && y < height as i32 {
                    let alpha = (coverage.clamp(0.0, 1.0) * color.a as f32) as u8;
                    let existing = image.get_pixel(x as u32, y as u32)[3];
                    // Overlapping glyph edges keep the stronger coverage
                    if alpha > existing {
                        image.put_pixel(x as u32, y as u32, Rgba([color.r, color.g, color.b, alpha]));
                    }
                }
            });
        }

        cursor_x += scaled.h_advance(glyph_id);
        prev_glyph = Some(glyph_id);
    }
}
