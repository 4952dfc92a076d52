//! Gradient border compositing
//!
//! The border follows the shape outline and is clipped to the shape, so it
//! never grows the bitmap or paints outside the masked area.

use tiny_skia::{
    FillRule, GradientStop, LinearGradient, Mask, Paint, Point, Shader, SpreadMode, Stroke,
    Transform,
};
use tracing::trace;

use super::shape::ShapeMask;
use super::Bitmap;
use crate::style::{ShapeKind, StrokeDescriptor, StrokeDirection};

/// Default border width as a fraction of the shorter side
pub const DEFAULT_STROKE_WIDTH_RATIO: f32 = 0.04;

/// Draws a [`StrokeDescriptor`] along the edge of a shape
#[derive(Debug, Clone, Copy)]
pub struct StrokeCompositor {
    shape: ShapeKind,
    width_ratio: f32,
}

impl StrokeCompositor {
    pub fn new(shape: ShapeKind) -> Self {
        Self {
            shape,
            width_ratio: DEFAULT_STROKE_WIDTH_RATIO,
        }
    }

    pub fn with_width_ratio(mut self, ratio: f32) -> Self {
        self.width_ratio = ratio;
        self
    }

    /// Composite the border over an already shape-masked `image`
    pub fn apply(&self, image: &Bitmap, stroke: &StrokeDescriptor) -> Bitmap {
        // Default widgets carry no stroke; skip the recomposite entirely.
        if stroke.is_noop() || image.is_empty() {
            return image.clone();
        }

        let (width, height) = (image.width() as f32, image.height() as f32);
        let (Some(mut pixmap), Some(path), Some(shader), Some(mut clip)) = (
            image.to_pixmap(),
            ShapeMask::path(self.shape, width, height),
            gradient_shader(stroke, width, height),
            Mask::new(image.width(), image.height()),
        ) else {
            return image.clone();
        };

        clip.fill_path(&path, FillRule::Winding, true, Transform::identity());

        let border = (width.min(height) * self.width_ratio).max(1.0);
        let paint = Paint {
            shader,
            anti_alias: true,
            ..Paint::default()
        };
        // Half of a centered stroke falls outside the outline and is clipped away.
        let line = Stroke {
            width: border * 2.0,
            ..Stroke::default()
        };
        pixmap.stroke_path(&path, &paint, &line, Transform::identity(), Some(&clip));

        trace!(shape = ?self.shape, border, direction = ?stroke.direction, "Applied stroke");
        Bitmap::from_pixmap(pixmap)
    }
}

/// Shader for the stroke colors laid out along its direction
fn gradient_shader(stroke: &StrokeDescriptor, width: f32, height: f32) -> Option<Shader<'static>> {
    let (start, end) = match stroke.direction {
        StrokeDirection::None => return None,
        StrokeDirection::Horizontal => ((0.0, height / 2.0), (width, height / 2.0)),
        StrokeDirection::Vertical => ((width / 2.0, 0.0), (width / 2.0, height)),
        StrokeDirection::DiagonalDown => ((0.0, 0.0), (width, height)),
        StrokeDirection::DiagonalUp => ((0.0, height), (width, 0.0)),
    };

    match stroke.colors.as_slice() {
        [] => None,
        [single] => Some(Shader::SolidColor(single.to_tiny_skia())),
        colors => {
            let last = (colors.len() - 1) as f32;
            let stops = colors
                .iter()
                .enumerate()
                .map(|(i, c)| GradientStop::new(i as f32 / last, c.to_tiny_skia()))
                .collect();
            LinearGradient::new(
                Point::from_xy(start.0, start.1),
                Point::from_xy(end.0, end.1),
                stops,
                SpreadMode::Pad,
                Transform::identity(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::Color;

    fn sample() -> Bitmap {
        Bitmap::solid(64, 64, Color::rgb(20, 40, 60))
    }

    #[test]
    fn test_direction_none_is_identity() {
        let image = sample();
        let stroke = StrokeDescriptor::new(
            vec![Color::rgb(255, 0, 0), Color::rgb(0, 0, 255)],
            StrokeDirection::None,
        );
        for shape in [ShapeKind::Rectangle, ShapeKind::Circle, ShapeKind::Star] {
            assert_eq!(StrokeCompositor::new(shape).apply(&image, &stroke), image);
        }
    }

    #[test]
    fn test_empty_or_transparent_colors_are_identity() {
        let image = sample();
        let compositor = StrokeCompositor::new(ShapeKind::Rectangle);
        let empty = StrokeDescriptor::new(vec![], StrokeDirection::Horizontal);
        let clear = StrokeDescriptor::new(vec![Color::TRANSPARENT], StrokeDirection::Vertical);
        assert_eq!(compositor.apply(&image, &empty), image);
        assert_eq!(compositor.apply(&image, &clear), image);
    }

    #[test]
    fn test_gradient_paints_edges_not_center() {
        let image = sample();
        let stroke = StrokeDescriptor::new(
            vec![Color::rgb(255, 0, 0), Color::rgb(0, 0, 255)],
            StrokeDirection::Horizontal,
        );
        let out = StrokeCompositor::new(ShapeKind::Rectangle).apply(&image, &stroke);

        assert_eq!(out.pixel(32, 32), image.pixel(32, 32));
        let left = out.pixel(0, 32).unwrap();
        let right = out.pixel(63, 32).unwrap();
        assert!(left[0] > left[2], "left edge should lean red: {:?}", left);
        assert!(right[2] > right[0], "right edge should lean blue: {:?}", right);
    }

    #[test]
    fn test_stroke_stays_inside_shape() {
        let masked = ShapeMask::apply(&sample(), ShapeKind::Circle);
        let stroke = StrokeDescriptor::new(vec![Color::WHITE], StrokeDirection::Vertical);
        let out = StrokeCompositor::new(ShapeKind::Circle).apply(&masked, &stroke);
        assert_eq!(out.pixel(0, 0).unwrap()[3], 0);
    }

    #[test]
    fn test_empty_bitmap_passes_through() {
        let stroke = StrokeDescriptor::new(vec![Color::WHITE], StrokeDirection::Vertical);
        assert!(StrokeCompositor::new(ShapeKind::Circle)
            .apply(&Bitmap::empty(), &stroke)
            .is_empty());
    }
}
