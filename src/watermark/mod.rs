//! Watermark module for compositing text and image marks onto images.
//!
//! # Features
//!
//! - **Text watermarks** drawn with an embedded bitmap font or a loaded outline font
//! - **Image watermarks** scaled to the configured size, aspect ratio preserved
//! - **5 anchors**: four corners plus center, with per-axis margins
//! - **Fail-soft rendering**: invalid numeric settings produce a plain copy
//!
//! # Settings Example
//!
//! ```yaml
//! mode: text
//! text: "SAMPLE"
//! font_size: 24
//! color: "#FFFFFF"
//! opacity: 0.5
//! anchor: bottom-right
//! margin_x: 10
//! margin_y: 10
//! ```

pub mod compositor;
pub mod config;
pub mod error;
pub mod position;
pub mod text_renderer;

// Re-export main types for convenience
pub use compositor::{image_mark_size, Compositor, DrawState, StyledSurface, Surface};
pub use config::{Anchor, EffectiveMark, MarkMode, WatermarkAsset, WatermarkSpec};
pub use error::WatermarkError;
pub use position::{solve, MarkCenter};
pub use text_renderer::{parse_hex_color, Color, GlyphSource, TextRenderer};
