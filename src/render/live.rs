//! Live dual-photo frame generation
//!
//! A live photo is shown as two frames flipping on the widget: in each frame
//! one capture fills the shape and the other sits in a small rounded inset.

use tiny_skia::{PixmapPaint, Transform};
use tracing::trace;

use super::shape::ShapeMask;
use super::stroke::{StrokeCompositor, DEFAULT_STROKE_WIDTH_RATIO};
use super::Bitmap;
use crate::style::{Color, ShapeKind, StrokeDescriptor, StrokeDirection};

/// Default inset side as a fraction of the primary's shorter side
pub const DEFAULT_INSET_RATIO: f32 = 0.34;
/// Inset distance from the top-left corner for box-like shapes
const INSET_MARGIN_RATIO: f32 = 0.06;
/// Shapes with cut corners need the inset pulled further in
const INSET_MARGIN_RATIO_CURVED: f32 = 0.16;

/// Builds the two alternating frames of a live photo
#[derive(Debug, Clone)]
pub struct LivePhotoCompositor {
    shape: ShapeKind,
    stroke: Option<StrokeDescriptor>,
    inset_ratio: f32,
    stroke_width_ratio: f32,
}

impl LivePhotoCompositor {
    pub fn new(shape: ShapeKind, stroke: Option<StrokeDescriptor>) -> Self {
        Self {
            shape,
            stroke,
            inset_ratio: DEFAULT_INSET_RATIO,
            stroke_width_ratio: DEFAULT_STROKE_WIDTH_RATIO,
        }
    }

    pub fn with_inset_ratio(mut self, ratio: f32) -> Self {
        self.inset_ratio = ratio;
        self
    }

    pub fn with_stroke_width_ratio(mut self, ratio: f32) -> Self {
        self.stroke_width_ratio = ratio;
        self
    }

    /// `primary` filling the shape with `secondary` as a decorative inset
    pub fn composite(&self, primary: &Bitmap, secondary: &Bitmap) -> Bitmap {
        let base = self.treat(primary);
        if base.is_empty() || secondary.is_empty() {
            return base;
        }

        let short_side = base.width().min(base.height()) as f32;
        let side = ((short_side * self.inset_ratio).round() as u32).max(1);
        let inset = self.inset(secondary, side);

        let margin_ratio = match self.shape {
            ShapeKind::Rectangle | ShapeKind::Rounded => INSET_MARGIN_RATIO,
            _ => INSET_MARGIN_RATIO_CURVED,
        };
        let offset = (short_side * margin_ratio).round() as i32;

        let (Some(mut canvas), Some(inset_ref)) = (base.to_pixmap(), inset.as_pixmap()) else {
            return base;
        };
        canvas.draw_pixmap(
            offset,
            offset,
            inset_ref,
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );

        trace!(shape = ?self.shape, side, offset, "Composited live frame");
        Bitmap::from_pixmap(canvas)
    }

    /// Both flip frames: `[composite(a, b), composite(b, a)]`
    pub fn frames(&self, first: &Bitmap, second: &Bitmap) -> [Bitmap; 2] {
        [self.composite(first, second), self.composite(second, first)]
    }

    /// Shape and stroke treatment of the filling capture
    fn treat(&self, image: &Bitmap) -> Bitmap {
        let masked = ShapeMask::apply(image, self.shape);
        match &self.stroke {
            Some(stroke) => StrokeCompositor::new(self.shape)
                .with_width_ratio(self.stroke_width_ratio)
                .apply(&masked, stroke),
            None => masked,
        }
    }

    /// Square rounded thumbnail with a white rim
    fn inset(&self, image: &Bitmap, side: u32) -> Bitmap {
        let thumb = image.center_square().scaled(side, side);
        let rounded = ShapeMask::apply(&thumb, ShapeKind::Rounded);
        let rim = StrokeDescriptor::new(vec![Color::WHITE], StrokeDirection::Vertical);
        StrokeCompositor::new(ShapeKind::Rounded)
            .with_width_ratio(self.stroke_width_ratio)
            .apply(&rounded, &rim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red() -> Bitmap {
        Bitmap::solid(90, 90, Color::rgb(220, 0, 0))
    }

    fn blue() -> Bitmap {
        Bitmap::solid(60, 120, Color::rgb(0, 0, 220))
    }

    #[test]
    fn test_composite_is_idempotent() {
        let compositor = LivePhotoCompositor::new(ShapeKind::Squircle, None);
        assert_eq!(
            compositor.composite(&red(), &blue()),
            compositor.composite(&red(), &blue())
        );
    }

    #[test]
    fn test_primary_fills_secondary_insets() {
        let compositor = LivePhotoCompositor::new(ShapeKind::Rectangle, None);
        let frame = compositor.composite(&red(), &blue());

        assert_eq!((frame.width(), frame.height()), (90, 90));
        // Bottom-right belongs to the primary
        let corner = frame.pixel(80, 80).unwrap();
        assert!(corner[0] > 200 && corner[2] == 0);
        // Inset center belongs to the secondary
        let offset = (90.0 * INSET_MARGIN_RATIO).round() as u32;
        let side = (90.0 * DEFAULT_INSET_RATIO).round() as u32;
        let inset = frame.pixel(offset + side / 2, offset + side / 2).unwrap();
        assert!(inset[2] > 200 && inset[0] == 0);
    }

    #[test]
    fn test_frames_are_asymmetric() {
        let compositor = LivePhotoCompositor::new(ShapeKind::Rectangle, None);
        let [a, b] = compositor.frames(&red(), &blue());
        assert_ne!(a, b);
        assert_eq!((b.width(), b.height()), (60, 120));
    }

    #[test]
    fn test_missing_secondary_keeps_treated_primary() {
        let compositor = LivePhotoCompositor::new(ShapeKind::Circle, None);
        let frame = compositor.composite(&red(), &Bitmap::empty());
        assert_eq!(frame, ShapeMask::apply(&red(), ShapeKind::Circle));
        assert!(compositor.composite(&Bitmap::empty(), &red()).is_empty());
    }
}
