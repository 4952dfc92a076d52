//! Registry migration from the legacy on-disk format
//!
//! The first registry format stored a flat JSON array of records with the
//! style spread over top-level fields. The current format is an object keyed
//! by widget id holding tagged [`WidgetRegistration`]s. Missing fields in
//! either format fall back to defaults (rectangle, no stroke, accept all).

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::WidgetRegistration;
use crate::error::StoreResult;
use crate::style::{Color, ShapeKind, StrokeDescriptor, StrokeDirection, WidgetStyle};

/// Legacy flat registration record
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyRegistration {
    pub id: i32,

    #[serde(default)]
    pub friends: BTreeSet<String>,

    #[serde(default)]
    pub shape: Option<ShapeKind>,

    #[serde(default)]
    pub stroke_colors: Vec<String>,

    #[serde(default)]
    pub stroke_direction: Option<StrokeDirection>,

    #[serde(default)]
    pub show_sender: bool,

    /// Legacy foreground asset; takes precedence over `shape` when set
    #[serde(default)]
    pub foreground: Option<String>,

    #[serde(default = "default_frames")]
    pub foreground_frames: u32,

    #[serde(default = "default_interval")]
    pub foreground_interval: u32,
}

fn default_frames() -> u32 {
    1
}
fn default_interval() -> u32 {
    500
}

/// Check if content looks like the legacy array format
pub fn is_legacy_format(content: &str) -> bool {
    content.trim_start().starts_with('[')
}

/// Parse registry content in either format
pub fn load_registrations(content: &str) -> StoreResult<BTreeMap<i32, WidgetRegistration>> {
    if is_legacy_format(content) {
        return migrate_from_legacy(content);
    }

    let keyed: BTreeMap<String, WidgetRegistration> = serde_json::from_str(content)?;
    let mut entries = BTreeMap::new();
    for (key, registration) in keyed {
        if key.parse::<i32>().ok() != Some(registration.id) {
            warn!(key = %key, widget_id = registration.id, "Registry key does not match widget id");
        }
        entries.insert(registration.id, sanitize(registration));
    }
    Ok(entries)
}

/// Replace a style that breaks its variant invariants with the default
fn sanitize(mut registration: WidgetRegistration) -> WidgetRegistration {
    if let Err(reason) = registration.style.validate() {
        warn!(
            widget_id = registration.id,
            reason = %reason,
            "Invalid stored style, falling back to default"
        );
        registration.style = WidgetStyle::default();
    }
    registration
}

/// Migrate a legacy array of flat records
pub fn migrate_from_legacy(content: &str) -> StoreResult<BTreeMap<i32, WidgetRegistration>> {
    let legacy: Vec<LegacyRegistration> = serde_json::from_str(content)?;

    info!(records = legacy.len(), "Migrating legacy widget registry");

    let entries = legacy
        .into_iter()
        .map(|old| (old.id, convert_legacy(old)))
        .collect();

    debug!("Migration complete");
    Ok(entries)
}

/// Convert a legacy record to the current model
fn convert_legacy(old: LegacyRegistration) -> WidgetRegistration {
    let style = match old.foreground {
        Some(asset) if !asset.is_empty() => WidgetStyle::Foreground {
            asset,
            frames: old.foreground_frames.max(1),
            interval: old.foreground_interval.max(1),
            padding: 0,
        },
        _ => {
            let colors: Vec<Color> = old
                .stroke_colors
                .iter()
                .filter_map(|hex| Color::from_hex(hex))
                .collect();
            let stroke = match old.stroke_direction {
                Some(direction) if !colors.is_empty() => {
                    Some(StrokeDescriptor::new(colors, direction))
                }
                _ => None,
            };
            WidgetStyle::Shape {
                shape: old.shape.unwrap_or_default(),
                stroke,
            }
        }
    };

    WidgetRegistration {
        id: old.id,
        friend_filter: old.friends,
        style,
        is_sender_info_shown: old.show_sender,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_legacy_format() {
        assert!(is_legacy_format(r#"  [{"id": 1}]"#));
        assert!(!is_legacy_format(r#"{"1": {"id": 1}}"#));
    }

    #[test]
    fn test_migrate_defaults() {
        let entries = load_registrations(r#"[{"id": 4}]"#).unwrap();
        assert_eq!(entries[&4], WidgetRegistration::new(4));
    }

    #[test]
    fn test_migrate_preserves_settings() {
        let content = r##"[
            {"id": 1, "friends": ["u1", "u2"], "shape": "heart",
             "stroke_colors": ["#FF0000", "#0000FF"], "stroke_direction": "vertical",
             "show_sender": true},
            {"id": 2, "foreground": "snow", "foreground_frames": 4, "foreground_interval": 250}
        ]"##;

        let entries = load_registrations(content).unwrap();
        assert_eq!(entries.len(), 2);

        let heart = &entries[&1];
        assert!(heart.is_sender_info_shown);
        assert!(heart.accepts("u2"));
        assert_eq!(
            heart.style,
            WidgetStyle::Shape {
                shape: ShapeKind::Heart,
                stroke: Some(StrokeDescriptor::new(
                    vec![Color::rgb(255, 0, 0), Color::rgb(0, 0, 255)],
                    StrokeDirection::Vertical,
                )),
            }
        );

        assert_eq!(
            entries[&2].style,
            WidgetStyle::Foreground {
                asset: "snow".to_string(),
                frames: 4,
                interval: 250,
                padding: 0,
            }
        );
    }

    #[test]
    fn test_stroke_without_direction_is_dropped() {
        let entries =
            load_registrations(r##"[{"id": 3, "shape": "circle", "stroke_colors": ["#FFFFFF"]}]"##)
                .unwrap();
        assert_eq!(entries[&3].style, WidgetStyle::shape(ShapeKind::Circle));
    }

    #[test]
    fn test_invalid_foreground_falls_back() {
        let content = r#"{
            "1": {"id": 1, "style": {"type": "foreground", "asset": "a", "frames": 0, "interval": 0}},
            "2": {"id": 2, "style": {"type": "foreground", "asset": "b", "frames": 3, "interval": 0}},
            "3": {"id": 3, "style": {"type": "foreground", "asset": "c", "frames": 2, "interval": 200}}
        }"#;
        let entries = load_registrations(content).unwrap();

        assert_eq!(entries[&1].style, WidgetStyle::default());
        assert_eq!(entries[&2].style, WidgetStyle::default());
        assert!(matches!(
            entries[&3].style,
            WidgetStyle::Foreground { frames: 2, interval: 200, .. }
        ));
    }

    #[test]
    fn test_current_format_missing_fields() {
        let entries = load_registrations(r#"{"9": {"id": 9}}"#).unwrap();
        assert_eq!(entries[&9], WidgetRegistration::new(9));
    }
}
