//! Widget styling: colors, clip shapes, gradient strokes and style variants
//!
//! Styles are persisted with an explicit `type` tag so that stored
//! registrations survive schema changes.

use serde::{Deserialize, Serialize};

/// RGBA color representation, persisted as `#RRGGBB` or `#AARRGGBB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    pub fn is_transparent(self) -> bool {
        self.a == 0
    }

    /// Convert to tiny-skia Color
    pub fn to_tiny_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, self.a)
    }

    /// Parse `#RRGGBB` or `#AARRGGBB`
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let value = u32::from_str_radix(digits, 16).ok()?;
        match digits.len() {
            6 => Some(Self::rgb(
                (value >> 16) as u8,
                (value >> 8) as u8,
                value as u8,
            )),
            8 => Some(Self::new(
                (value >> 16) as u8,
                (value >> 8) as u8,
                value as u8,
                (value >> 24) as u8,
            )),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.a, self.r, self.g, self.b)
        }
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value).ok_or_else(|| format!("invalid color '{}'", value))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

/// Clip shape applied to the content photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    /// No clipping
    #[default]
    Rectangle,
    /// Rectangle with rounded corners
    Rounded,
    Circle,
    /// Superellipse between a circle and a square
    Squircle,
    Heart,
    Star,
}

impl ShapeKind {
    /// Whether clipping with this shape leaves the image untouched
    pub fn is_identity(self) -> bool {
        matches!(self, ShapeKind::Rectangle)
    }
}

/// Direction of a gradient stroke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrokeDirection {
    #[default]
    None,
    /// Left to right
    Horizontal,
    /// Top to bottom
    Vertical,
    /// Top-left to bottom-right
    DiagonalDown,
    /// Bottom-left to top-right
    DiagonalUp,
}

/// Gradient border drawn along the shape's outer edge
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StrokeDescriptor {
    #[serde(default)]
    pub colors: Vec<Color>,
    #[serde(default)]
    pub direction: StrokeDirection,
}

impl StrokeDescriptor {
    pub fn new(colors: Vec<Color>, direction: StrokeDirection) -> Self {
        Self { colors, direction }
    }

    /// A stroke that draws nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// True when drawing this stroke would not change any pixel
    pub fn is_noop(&self) -> bool {
        self.direction == StrokeDirection::None
            || self.colors.iter().all(|c| c.is_transparent())
    }
}

/// Widget skin, exactly one variant active per registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WidgetStyle {
    /// Content photo clipped to a shape with an optional gradient border
    Shape {
        #[serde(default)]
        shape: ShapeKind,
        #[serde(default)]
        stroke: Option<StrokeDescriptor>,
    },
    /// Animated multi-frame overlay drawn over the unclipped photo
    Foreground {
        asset: String,
        frames: u32,
        /// Flip interval in milliseconds
        interval: u32,
        /// Padding in dp around the photo
        #[serde(default)]
        padding: u32,
    },
}

impl WidgetStyle {
    pub fn shape(shape: ShapeKind) -> Self {
        WidgetStyle::Shape {
            shape,
            stroke: None,
        }
    }

    /// Whether this is a plain rectangle shape (the only style with a sender overlay)
    pub fn is_rectangle(&self) -> bool {
        matches!(
            self,
            WidgetStyle::Shape {
                shape: ShapeKind::Rectangle,
                ..
            }
        )
    }

    /// Validate variant invariants
    pub fn validate(&self) -> Result<(), String> {
        match self {
            WidgetStyle::Shape { .. } => Ok(()),
            WidgetStyle::Foreground {
                asset,
                frames,
                interval,
                ..
            } => {
                if asset.is_empty() {
                    return Err("foreground asset name must not be empty".to_string());
                }
                if *frames == 0 {
                    return Err("foreground needs at least one frame".to_string());
                }
                if *interval == 0 {
                    return Err("foreground flip interval must be positive".to_string());
                }
                Ok(())
            }
        }
    }
}

impl Default for WidgetStyle {
    fn default() -> Self {
        WidgetStyle::shape(ShapeKind::Rectangle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_hex() {
        assert_eq!(Color::from_hex("#FF8040"), Some(Color::rgb(255, 128, 64)));
        assert_eq!(
            Color::from_hex("#80FF8040"),
            Some(Color::new(255, 128, 64, 128))
        );
        assert_eq!(Color::from_hex("#123"), None);
        assert_eq!(Color::from_hex("#+FFFFF"), None);
        assert_eq!(Color::from_hex("#-0000001"), None);
        assert_eq!(Color::new(1, 2, 3, 4).to_hex(), "#04010203");
    }

    #[test]
    fn test_color_with_alpha() {
        let color = Color::rgb(255, 255, 255).with_alpha(128);
        assert_eq!(color.a, 128);
    }

    #[test]
    fn test_stroke_noop() {
        assert!(StrokeDescriptor::none().is_noop());
        assert!(StrokeDescriptor::new(vec![Color::rgb(1, 2, 3)], StrokeDirection::None).is_noop());
        assert!(
            StrokeDescriptor::new(vec![Color::TRANSPARENT], StrokeDirection::Vertical).is_noop()
        );
        assert!(!StrokeDescriptor::new(vec![Color::WHITE], StrokeDirection::Vertical).is_noop());
    }

    #[test]
    fn test_style_tag_serialization() {
        let style = WidgetStyle::Shape {
            shape: ShapeKind::Circle,
            stroke: Some(StrokeDescriptor::new(
                vec![Color::rgb(255, 0, 0), Color::rgb(0, 0, 255)],
                StrokeDirection::Horizontal,
            )),
        };
        let json = serde_json::to_value(&style).unwrap();
        assert_eq!(json["type"], "shape");
        assert_eq!(json["shape"], "circle");
        assert_eq!(json["stroke"]["colors"][0], "#FF0000");

        let foreground: WidgetStyle = serde_json::from_str(
            r#"{"type":"foreground","asset":"hearts","frames":3,"interval":400}"#,
        )
        .unwrap();
        assert!(matches!(
            foreground,
            WidgetStyle::Foreground { padding: 0, frames: 3, .. }
        ));
    }

    #[test]
    fn test_shape_defaults_when_fields_missing() {
        let style: WidgetStyle = serde_json::from_str(r#"{"type":"shape"}"#).unwrap();
        assert_eq!(style, WidgetStyle::default());
        assert!(style.is_rectangle());
    }

    #[test]
    fn test_foreground_validation() {
        let bad = WidgetStyle::Foreground {
            asset: "stars".to_string(),
            frames: 0,
            interval: 300,
            padding: 8,
        };
        assert!(bad.validate().is_err());
        assert!(WidgetStyle::default().validate().is_ok());
    }
}
