//! Watermark compositor.
//!
//! Draws one source image plus its watermark onto a fresh output surface.
//!
//! Drawing style (global alpha and fill color) lives on the `Surface` and can
//! only be changed through a `StyledSurface` guard. The guard restores the
//! default opaque state when it goes out of scope, so a surface handed back to
//! a caller is always in a normal state for further drawing.
//!
//! Invalid numeric settings are fail-soft: the render returns a verbatim copy
//! of the source instead of an error.

use super::position::solve;
use super::text_renderer::{Color, TextRenderer};
use super::{EffectiveMark, WatermarkSpec};
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use tracing::debug;

/// Style attributes applied to every draw call on a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawState {
    pub global_alpha: f32,
    pub fill: Color,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            global_alpha: 1.0,
            fill: Color::black(),
        }
    }
}

/// An RGBA pixel surface with scoped draw state.
#[derive(Debug, Clone)]
pub struct Surface {
    pixels: RgbaImage,
    state: DrawState,
}

impl Surface {
    /// Create a surface holding a verbatim RGBA copy of `source`.
    pub fn from_source(source: &DynamicImage) -> Self {
        Self {
            pixels: source.to_rgba8(),
            state: DrawState::default(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn state(&self) -> DrawState {
        self.state
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    /// Apply a draw style until the returned guard is dropped.
    pub fn styled(&mut self, global_alpha: f32, fill: Color) -> StyledSurface<'_> {
        self.state = DrawState { global_alpha, fill };
        StyledSurface { surface: self }
    }
}

/// Scoped style acquisition on a `Surface`.
pub struct StyledSurface<'a> {
    surface: &'a mut Surface,
}

impl StyledSurface<'_> {
    /// Blend `image` with its top-left corner at (`x`, `y`).
    ///
    /// Pixels falling outside the surface are skipped.
    pub fn draw_image(&mut self, image: &RgbaImage, x: i64, y: i64) {
        let alpha = self.surface.state.global_alpha;
        blend_layer(&mut self.surface.pixels, image, x, y, alpha);
    }

    /// Rasterize `text` in the current fill color with its box centered at (`cx`, `cy`).
    pub fn fill_text(&mut self, renderer: &TextRenderer, text: &str, font_size: f32, cx: f32, cy: f32) {
        let fill = self.surface.state.fill;
        let layer = renderer.rasterize(text, font_size, fill);
        let width = renderer.measure(text, font_size);
        let x = (cx - width / 2.0).round() as i64;
        let y = (cy - font_size / 2.0).round() as i64;
        self.draw_image(&layer, x, y);
    }
}

impl Drop for StyledSurface<'_> {
    fn drop(&mut self) {
        self.surface.state = DrawState::default();
    }
}

/// Draw size of an image mark on a canvas.
///
/// Height follows the font size and width follows the asset's aspect ratio;
/// each axis is then clamped on its own to `max(1, canvas - 2 * margin)`, so
/// the aspect ratio may change when clamping kicks in.
pub fn image_mark_size(
    aspect_ratio: f32,
    font_size: f32,
    canvas_w: u32,
    canvas_h: u32,
    margin_x: u32,
    margin_y: u32,
) -> (f32, f32) {
    let height = font_size;
    let width = height * aspect_ratio;

    let max_w = (canvas_w as f32 - 2.0 * margin_x as f32).max(1.0);
    let max_h = (canvas_h as f32 - 2.0 * margin_y as f32).max(1.0);

    (width.min(max_w), height.min(max_h))
}

/// Renders watermarked copies of source images.
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    text: TextRenderer,
}

impl Compositor {
    pub fn new(text: TextRenderer) -> Self {
        Self { text }
    }

    pub fn text_renderer(&self) -> &TextRenderer {
        &self.text
    }

    /// Render `source` with the mark described by `spec`.
    pub fn render(&self, source: &DynamicImage, spec: &WatermarkSpec) -> RgbaImage {
        self.render_surface(source, spec).into_image()
    }

    /// Render onto a `Surface`, leaving its draw state opaque.
    pub fn render_surface(&self, source: &DynamicImage, spec: &WatermarkSpec) -> Surface {
        let mut surface = Surface::from_source(source);

        if let Err(e) = spec.check_numeric() {
            debug!(error = %e, "Skipping watermark, rendering plain copy");
            return surface;
        }

        let canvas_w = surface.width();
        let canvas_h = surface.height();
        let margin_x = spec.margin_x as f32;
        let margin_y = spec.margin_y as f32;

        match spec.effective_mark() {
            EffectiveMark::Nothing => {}
            EffectiveMark::Image(asset) => {
                let (mark_w, mark_h) = image_mark_size(
                    asset.aspect_ratio(),
                    spec.font_size,
                    canvas_w,
                    canvas_h,
                    spec.margin_x,
                    spec.margin_y,
                );
                let center = solve(
                    spec.anchor,
                    canvas_w as f32,
                    canvas_h as f32,
                    mark_w,
                    mark_h,
                    margin_x,
                    margin_y,
                );

                let scaled = image::imageops::resize(
                    asset.image(),
                    (mark_w.round() as u32).max(1),
                    (mark_h.round() as u32).max(1),
                    FilterType::Triangle,
                );
                let (x, y) = center.top_left(mark_w, mark_h);

                let mut styled = surface.styled(spec.opacity, spec.color);
                styled.draw_image(&scaled, x.round() as i64, y.round() as i64);
            }
            EffectiveMark::Text(text) => {
                let mark_w = self.text.measure(text, spec.font_size);
                let mark_h = spec.font_size;
                let center = solve(
                    spec.anchor,
                    canvas_w as f32,
                    canvas_h as f32,
                    mark_w,
                    mark_h,
                    margin_x,
                    margin_y,
                );

                let mut styled = surface.styled(spec.opacity, spec.color);
                styled.fill_text(&self.text, text, spec.font_size, center.cx, center.cy);
            }
        }

        surface
    }
}

/// Blend a layer onto the target at the given offset.
fn blend_layer(target: &mut RgbaImage, layer: &RgbaImage, x: i64, y: i64, opacity: f32) {
    let target_width = target.width() as i64;
    let target_height = target.height() as i64;

    // Calculate the visible region (clamp to target bounds)
    let x_start = x.max(0);
    let y_start = y.max(0);
    let x_end = (x + layer.width() as i64).min(target_width);
    let y_end = (y + layer.height() as i64).min(target_height);

    for ty in y_start..y_end {
        for tx in x_start..x_end {
            let wm_pixel = layer.get_pixel((tx - x) as u32, (ty - y) as u32);
            if wm_pixel[3] == 0 {
                continue;
            }
            let target_pixel = target.get_pixel(tx as u32, ty as u32);
            let blended = blend_pixels(*target_pixel, *wm_pixel, opacity);
            target.put_pixel(tx as u32, ty as u32, blended);
        }
    }
}

/// Blend two pixels using alpha compositing with additional opacity.
///
/// Uses the "over" operator: result = foreground + background * (1 - foreground.alpha)
fn blend_pixels(background: Rgba<u8>, foreground: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let fg_alpha = (foreground[3] as f32 / 255.0) * opacity.clamp(0.0, 1.0);
    let bg_alpha = background[3] as f32 / 255.0;

    let out_alpha = fg_alpha + bg_alpha * (1.0 - fg_alpha);

    if out_alpha < 0.001 {
        return Rgba([0, 0, 0, 0]);
    }

    let blend_channel = |fg: u8, bg: u8| -> u8 {
        let fg_f = fg as f32 / 255.0;
        let bg_f = bg as f32 / 255.0;
        let result = (fg_f * fg_alpha + bg_f * bg_alpha * (1.0 - fg_alpha)) / out_alpha;
        (result * 255.0).round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        blend_channel(foreground[0], background[0]),
        blend_channel(foreground[1], background[1]),
        blend_channel(foreground[2], background[2]),
        (out_alpha * 255.0).round() as u8,
    ])
}
