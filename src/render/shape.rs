//! Shape clipping for content photos
//!
//! Every shape is defined as a vector path centered on and scaled to the
//! input's bounding box. Rectangle is the identity.

use std::f32::consts::PI;

use tiny_skia::{FillRule, Mask, Path, PathBuilder, Pixmap, PixmapPaint, Rect, Transform};
use tracing::trace;

use super::Bitmap;
use crate::style::ShapeKind;

/// Corner radius of [`ShapeKind::Rounded`] as a fraction of the shorter side
const ROUNDED_CORNER_RATIO: f32 = 0.18;
/// Superellipse exponent for [`ShapeKind::Squircle`]
const SQUIRCLE_EXPONENT: f32 = 4.0;
const SQUIRCLE_SEGMENTS: usize = 96;
/// Inner radius of [`ShapeKind::Star`] relative to the outer one
const STAR_INNER_RATIO: f32 = 0.45;

/// Clips bitmaps to a [`ShapeKind`]
pub struct ShapeMask;

impl ShapeMask {
    /// Clip `image` to `shape`; pixels outside the shape become transparent
    pub fn apply(image: &Bitmap, shape: ShapeKind) -> Bitmap {
        if image.is_empty() {
            return Bitmap::empty();
        }
        if shape.is_identity() {
            return image.clone();
        }

        let (width, height) = (image.width(), image.height());
        let (Some(src), Some(path), Some(mut mask), Some(mut out)) = (
            image.as_pixmap(),
            Self::path(shape, width as f32, height as f32),
            Mask::new(width, height),
            Pixmap::new(width, height),
        ) else {
            return image.clone();
        };

        mask.fill_path(&path, FillRule::Winding, true, Transform::identity());
        out.draw_pixmap(
            0,
            0,
            src,
            &PixmapPaint::default(),
            Transform::identity(),
            Some(&mask),
        );

        trace!(?shape, width, height, "Applied shape mask");
        Bitmap::from_pixmap(out)
    }

    /// Outline of `shape` filling a `width` x `height` box
    pub fn path(shape: ShapeKind, width: f32, height: f32) -> Option<Path> {
        if width <= 0.0 || height <= 0.0 {
            return None;
        }
        match shape {
            ShapeKind::Rectangle => Some(PathBuilder::from_rect(Rect::from_xywh(
                0.0, 0.0, width, height,
            )?)),
            ShapeKind::Rounded => {
                rounded_rect_path(width, height, width.min(height) * ROUNDED_CORNER_RATIO)
            }
            ShapeKind::Circle => PathBuilder::from_oval(Rect::from_xywh(0.0, 0.0, width, height)?),
            ShapeKind::Squircle => unit_squircle()?.transform(Transform::from_scale(width, height)),
            ShapeKind::Heart => unit_heart()?.transform(Transform::from_scale(width, height)),
            ShapeKind::Star => unit_star()?.transform(Transform::from_scale(width, height)),
        }
    }
}

/// Center-crop to a square and clip to a circle, as used for avatars
pub fn circle_crop(image: &Bitmap) -> Bitmap {
    ShapeMask::apply(&image.center_square(), ShapeKind::Circle)
}

/// Rounded rectangle with proper circular corners
fn rounded_rect_path(width: f32, height: f32, radius: f32) -> Option<Path> {
    let r = radius.min(width / 2.0).min(height / 2.0);

    if r <= 0.5 {
        return Some(PathBuilder::from_rect(Rect::from_xywh(0.0, 0.0, width, height)?));
    }

    let mut pb = PathBuilder::new();

    // Kappa constant for cubic bezier approximation of a quarter circle
    const KAPPA: f32 = 0.5522847498;
    let k = r * KAPPA;

    pb.move_to(r, 0.0);
    pb.line_to(width - r, 0.0);
    pb.cubic_to(width - r + k, 0.0, width, r - k, width, r);
    pb.line_to(width, height - r);
    pb.cubic_to(width, height - r + k, width - r + k, height, width - r, height);
    pb.line_to(r, height);
    pb.cubic_to(r - k, height, 0.0, height - r + k, 0.0, height - r);
    pb.line_to(0.0, r);
    pb.cubic_to(0.0, r - k, r - k, 0.0, r, 0.0);

    pb.close();
    pb.finish()
}

/// |x|^n + |y|^n = 1 inside the unit square
fn unit_squircle() -> Option<Path> {
    let mut pb = PathBuilder::new();
    for i in 0..SQUIRCLE_SEGMENTS {
        let theta = i as f32 / SQUIRCLE_SEGMENTS as f32 * 2.0 * PI;
        let (sin, cos) = theta.sin_cos();
        let x = cos.signum() * cos.abs().powf(2.0 / SQUIRCLE_EXPONENT);
        let y = sin.signum() * sin.abs().powf(2.0 / SQUIRCLE_EXPONENT);
        let (px, py) = (0.5 + x * 0.5, 0.5 + y * 0.5);
        if i == 0 {
            pb.move_to(px, py);
        } else {
            pb.line_to(px, py);
        }
    }
    pb.close();
    pb.finish()
}

fn unit_heart() -> Option<Path> {
    let mut pb = PathBuilder::new();
    pb.move_to(0.5, 0.25);
    pb.cubic_to(0.5, 0.0, 0.0, 0.0, 0.0, 0.3);
    pb.cubic_to(0.0, 0.6, 0.35, 0.75, 0.5, 1.0);
    pb.cubic_to(0.65, 0.75, 1.0, 0.6, 1.0, 0.3);
    pb.cubic_to(1.0, 0.0, 0.5, 0.0, 0.5, 0.25);
    pb.close();
    pb.finish()
}

/// Five-pointed star, first point straight up
fn unit_star() -> Option<Path> {
    let mut pb = PathBuilder::new();
    for i in 0..10 {
        let radius = if i % 2 == 0 { 0.5 } else { 0.5 * STAR_INNER_RATIO };
        let theta = -PI / 2.0 + i as f32 * PI / 5.0;
        let (px, py) = (0.5 + radius * theta.cos(), 0.5 + radius * theta.sin());
        if i == 0 {
            pb.move_to(px, py);
        } else {
            pb.line_to(px, py);
        }
    }
    pb.close();
    pb.finish()
}
