// Bitmap compositing using tiny-skia
//
// All compositors here are pure: same input bitmap, same output bytes.
// Zero-sized bitmaps are valid values and pass through every compositor
// as zero-sized results.

pub mod live;
pub mod shape;
pub mod stroke;

use std::fmt;

use tiny_skia::{
    ColorU8, FilterQuality, IntSize, Pixmap, PixmapPaint, PixmapRef, Transform,
};

use crate::style::Color;

pub use live::{LivePhotoCompositor, DEFAULT_INSET_RATIO};
pub use shape::{circle_crop, ShapeMask};
pub use stroke::{StrokeCompositor, DEFAULT_STROKE_WIDTH_RATIO};

/// Premultiplied RGBA raster image
///
/// Unlike [`Pixmap`], a `Bitmap` may be zero-sized.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Bitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Bitmap {
    /// A zero-sized bitmap
    pub fn empty() -> Self {
        Self::default()
    }

    /// A fully transparent bitmap
    pub fn new(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return Self::empty();
        }
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// A bitmap filled with one color
    pub fn solid(width: u32, height: u32, color: Color) -> Self {
        let mut bitmap = Self::new(width, height);
        let pixel = ColorU8::from_rgba(color.r, color.g, color.b, color.a).premultiply();
        for chunk in bitmap.data.chunks_exact_mut(4) {
            chunk.copy_from_slice(&[pixel.red(), pixel.green(), pixel.blue(), pixel.alpha()]);
        }
        bitmap
    }

    /// Build from straight-alpha RGBA bytes (as produced by image decoders)
    pub fn from_rgba8(width: u32, height: u32, rgba: &[u8]) -> Self {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() < expected {
            return Self::empty();
        }

        let mut data = Vec::with_capacity(expected);
        for chunk in rgba[..expected].chunks_exact(4) {
            let pixel = ColorU8::from_rgba(chunk[0], chunk[1], chunk[2], chunk[3]).premultiply();
            data.extend_from_slice(&[pixel.red(), pixel.green(), pixel.blue(), pixel.alpha()]);
        }

        Self {
            width,
            height,
            data,
        }
    }

    /// Take ownership of a pixmap's pixels
    pub fn from_pixmap(pixmap: Pixmap) -> Self {
        let (width, height) = (pixmap.width(), pixmap.height());
        Self {
            width,
            height,
            data: pixmap.take(),
        }
    }

    /// Copy into an owned pixmap; `None` for zero-sized bitmaps
    pub fn to_pixmap(&self) -> Option<Pixmap> {
        let size = IntSize::from_wh(self.width, self.height)?;
        Pixmap::from_vec(self.data.clone(), size)
    }

    /// Borrow as a pixmap; `None` for zero-sized bitmaps
    pub fn as_pixmap(&self) -> Option<PixmapRef<'_>> {
        PixmapRef::from_bytes(&self.data, self.width, self.height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Premultiplied RGBA bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Premultiplied RGBA of one pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let mut out = [0; 4];
        out.copy_from_slice(&self.data[idx..idx + 4]);
        Some(out)
    }

    /// Straight-alpha RGBA bytes, suitable for encoding
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len());
        for chunk in self.data.chunks_exact(4) {
            let a = chunk[3];
            if a == 0 {
                out.extend_from_slice(&[0, 0, 0, 0]);
                continue;
            }
            let demultiply = |c: u8| ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8;
            out.extend_from_slice(&[demultiply(chunk[0]), demultiply(chunk[1]), demultiply(chunk[2]), a]);
        }
        out
    }

    /// Resample to an exact size with bilinear filtering
    pub fn scaled(&self, width: u32, height: u32) -> Bitmap {
        let (Some(src), Some(mut dst)) = (self.as_pixmap(), Pixmap::new(width, height)) else {
            return Bitmap::empty();
        };
        if width == self.width && height == self.height {
            return self.clone();
        }

        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        let transform = Transform::from_scale(
            width as f32 / self.width as f32,
            height as f32 / self.height as f32,
        );
        dst.draw_pixmap(0, 0, src, &paint, transform, None);
        Bitmap::from_pixmap(dst)
    }

    /// Downsample so the longer side is at most `max_side`, keeping aspect ratio
    pub fn fit_within(&self, max_side: u32) -> Bitmap {
        let longest = self.width.max(self.height);
        if longest <= max_side || max_side == 0 {
            return self.clone();
        }
        let scale = max_side as f32 / longest as f32;
        let width = ((self.width as f32 * scale).round() as u32).max(1);
        let height = ((self.height as f32 * scale).round() as u32).max(1);
        self.scaled(width, height)
    }

    /// Centered square crop with side `min(width, height)`
    pub fn center_square(&self) -> Bitmap {
        if self.width == self.height {
            return self.clone();
        }
        let side = self.width.min(self.height);
        self.crop(
            (self.width - side) / 2,
            (self.height - side) / 2,
            side,
            side,
        )
    }

    /// Copy out a sub-rectangle, clamped to the bitmap bounds
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Bitmap {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        if x >= x_end || y >= y_end {
            return Bitmap::empty();
        }

        let mut out = Bitmap::new(x_end - x, y_end - y);
        let row_len = (x_end - x) as usize * 4;
        for (row, src_y) in (y..y_end).enumerate() {
            let src = (src_y as usize * self.width as usize + x as usize) * 4;
            let dst = row * row_len;
            out.data[dst..dst + row_len].copy_from_slice(&self.data[src..src + row_len]);
        }
        out
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_sized_bitmaps() {
        assert!(Bitmap::new(0, 10).is_empty());
        assert!(Bitmap::empty().as_pixmap().is_none());
        assert!(Bitmap::empty().scaled(10, 10).is_empty());
        assert!(Bitmap::from_rgba8(2, 2, &[0; 3]).is_empty());
    }

    #[test]
    fn test_premultiply_and_back() {
        let bitmap = Bitmap::from_rgba8(1, 1, &[200, 100, 50, 128]);
        let premultiplied = bitmap.pixel(0, 0).unwrap();
        assert_eq!(premultiplied[3], 128);
        assert!(premultiplied[0] < 200);

        let straight = bitmap.to_rgba8();
        assert!((straight[0] as i32 - 200).abs() <= 2);
        assert_eq!(straight[3], 128);
    }

    #[test]
    fn test_center_square_crop() {
        let bitmap = Bitmap::solid(40, 20, Color::WHITE);
        let square = bitmap.center_square();
        assert_eq!((square.width(), square.height()), (20, 20));
    }

    #[test]
    fn test_fit_within_keeps_aspect() {
        let bitmap = Bitmap::solid(400, 200, Color::WHITE);
        let fitted = bitmap.fit_within(100);
        assert_eq!((fitted.width(), fitted.height()), (100, 50));

        let small = Bitmap::solid(10, 10, Color::WHITE);
        assert_eq!(small.fit_within(100), small);
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let bitmap = Bitmap::solid(10, 10, Color::WHITE);
        let cropped = bitmap.crop(8, 8, 10, 10);
        assert_eq!((cropped.width(), cropped.height()), (2, 2));
        assert!(bitmap.crop(20, 0, 5, 5).is_empty());
    }
}
