//! Position calculation for watermark placement.
//!
//! The solver returns the **center** point at which the mark is drawn. Margins
//! are measured from the canvas edge to the mark's bounding box, so corner
//! anchors offset the center by half the mark extent plus the margin.
//!
//! No clamping is performed: a mark larger than the canvas, or a negative
//! margin, may land partly or fully off-canvas.
//!
//! # Example
//!
//! ```
//! use bulk_watermarker::watermark::position::{solve, MarkCenter};
//! use bulk_watermarker::watermark::Anchor;
//!
//! let center = solve(Anchor::BottomRight, 800.0, 600.0, 100.0, 50.0, 10.0, 10.0);
//! assert_eq!(center, MarkCenter::new(740.0, 565.0)); // 800 - 50 - 10, 600 - 25 - 10
//! ```

use super::Anchor;

/// Center point of a placed mark, in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkCenter {
    pub cx: f32,
    pub cy: f32,
}

impl MarkCenter {
    pub fn new(cx: f32, cy: f32) -> Self {
        Self { cx, cy }
    }

    /// Top-left draw origin for a mark of the given size centered here.
    pub fn top_left(&self, mark_w: f32, mark_h: f32) -> (f32, f32) {
        (self.cx - mark_w / 2.0, self.cy - mark_h / 2.0)
    }
}

/// Solve the center point of a mark for the given anchor.
pub fn solve(
    anchor: Anchor,
    canvas_w: f32,
    canvas_h: f32,
    mark_w: f32,
    mark_h: f32,
    margin_x: f32,
    margin_y: f32,
) -> MarkCenter {
    let left = mark_w / 2.0 + margin_x;
    let right = canvas_w - mark_w / 2.0 - margin_x;
    let top = mark_h / 2.0 + margin_y;
    let bottom = canvas_h - mark_h / 2.0 - margin_y;

    match anchor {
        Anchor::TopLeft => MarkCenter::new(left, top),
        Anchor::TopRight => MarkCenter::new(right, top),
        Anchor::BottomLeft => MarkCenter::new(left, bottom),
        Anchor::BottomRight => MarkCenter::new(right, bottom),
        Anchor::Center => MarkCenter::new(canvas_w / 2.0, canvas_h / 2.0),
    }
}
