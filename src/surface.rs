//! Widget surface descriptions and sinks
//!
//! A widget surface is a fixed set of named regions. The engine never draws
//! the widget itself: it pushes ordered [`SurfaceUpdate`]s describing what
//! each region should show, and the sink owns the actual presentation.
//! Pushes are idempotent and last-write-wins per region.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ComposeError, ComposeResult};
use crate::render::Bitmap;

/// Named area of the widget surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// The content photo
    Content,
    /// Circle-cropped sender photo
    SenderAvatar,
    SenderName,
    /// Container of avatar and name, toggled as a whole
    SenderGroup,
    PlayButton,
    Reaction,
    /// Flip container cycling the two live-photo frames
    LiveFlipper,
    /// Flip container cycling foreground overlay frames
    ForegroundFlipper,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Content => "content",
            Region::SenderAvatar => "sender_avatar",
            Region::SenderName => "sender_name",
            Region::SenderGroup => "sender_group",
            Region::PlayButton => "play_button",
            Region::Reaction => "reaction",
            Region::LiveFlipper => "live_flipper",
            Region::ForegroundFlipper => "foreground_flipper",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whole-widget placeholder shown instead of composited content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placeholder {
    /// The user has no friends yet
    EmptyFriends,
    /// No photo has been received yet
    EmptyPhoto,
}

/// One instruction for the widget surface
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    SetImage { region: Region, bitmap: Bitmap },
    SetText { region: Region, text: String },
    SetVisible { region: Region, visible: bool },
    ClearFlipper { region: Region },
    AddFlipperFrame { region: Region, bitmap: Bitmap },
    /// Overlay frame referenced by asset name, resolved by the sink
    AddForegroundFrame { asset: String },
    SetFlipInterval { region: Region, millis: u32 },
    SetPadding { dp: u32 },
    ShowPlaceholder(Placeholder),
}

/// Ordered list of operations for one widget
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceUpdate {
    ops: Vec<SurfaceOp>,
}

impl SurfaceUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placeholder(kind: Placeholder) -> Self {
        Self::new().push(SurfaceOp::ShowPlaceholder(kind))
    }

    pub fn push(mut self, op: SurfaceOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn image(self, region: Region, bitmap: Bitmap) -> Self {
        self.push(SurfaceOp::SetImage { region, bitmap })
    }

    pub fn text(self, region: Region, text: impl Into<String>) -> Self {
        self.push(SurfaceOp::SetText {
            region,
            text: text.into(),
        })
    }

    pub fn visible(self, region: Region, visible: bool) -> Self {
        self.push(SurfaceOp::SetVisible { region, visible })
    }

    pub fn ops(&self) -> &[SurfaceOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Image set for `region` by this update, if any
    pub fn image_for(&self, region: Region) -> Option<&Bitmap> {
        self.ops.iter().rev().find_map(|op| match op {
            SurfaceOp::SetImage { region: r, bitmap } if *r == region => Some(bitmap),
            _ => None,
        })
    }

    /// Text set for `region` by this update, if any
    pub fn text_for(&self, region: Region) -> Option<&str> {
        self.ops.iter().rev().find_map(|op| match op {
            SurfaceOp::SetText { region: r, text } if *r == region => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Destination of widget surface updates
#[async_trait]
pub trait SurfaceSink: Send + Sync {
    /// Apply `update` to the widget `widget_id`
    async fn push(&self, widget_id: i32, update: SurfaceUpdate) -> ComposeResult<()>;
}

/// Folded state of one widget surface
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceState {
    pub images: BTreeMap<Region, Bitmap>,
    pub texts: BTreeMap<Region, String>,
    pub visibility: BTreeMap<Region, bool>,
    pub flipper_frames: BTreeMap<Region, Vec<Bitmap>>,
    pub foreground_frames: Vec<String>,
    pub flip_intervals: BTreeMap<Region, u32>,
    pub padding: Option<u32>,
    pub placeholder: Option<Placeholder>,
}

impl SurfaceState {
    /// Apply operations in order, each overwriting its region
    pub fn apply(&mut self, update: &SurfaceUpdate) {
        for op in update.ops() {
            match op {
                SurfaceOp::SetImage { region, bitmap } => {
                    self.images.insert(*region, bitmap.clone());
                    self.placeholder = None;
                }
                SurfaceOp::SetText { region, text } => {
                    self.texts.insert(*region, text.clone());
                }
                SurfaceOp::SetVisible { region, visible } => {
                    self.visibility.insert(*region, *visible);
                }
                SurfaceOp::ClearFlipper { region } => {
                    if *region == Region::ForegroundFlipper {
                        self.foreground_frames.clear();
                    }
                    self.flipper_frames.remove(region);
                }
                SurfaceOp::AddFlipperFrame { region, bitmap } => {
                    self.flipper_frames
                        .entry(*region)
                        .or_default()
                        .push(bitmap.clone());
                    self.placeholder = None;
                }
                SurfaceOp::AddForegroundFrame { asset } => {
                    self.foreground_frames.push(asset.clone());
                }
                SurfaceOp::SetFlipInterval { region, millis } => {
                    self.flip_intervals.insert(*region, *millis);
                }
                SurfaceOp::SetPadding { dp } => self.padding = Some(*dp),
                SurfaceOp::ShowPlaceholder(kind) => self.placeholder = Some(*kind),
            }
        }
    }

    pub fn is_visible(&self, region: Region) -> bool {
        self.visibility.get(&region).copied().unwrap_or(false)
    }
}

/// Sink keeping every widget's surface in memory, with a log of all pushes
///
/// The log keeps every update it receives; this sink is meant for tests and
/// short-lived inspection, not long-running embedding.
#[derive(Debug, Default)]
pub struct MemorySurfaceSink {
    surfaces: Mutex<HashMap<i32, SurfaceState>>,
    log: Mutex<Vec<(i32, SurfaceUpdate)>>,
}

impl MemorySurfaceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a widget's surface
    pub fn surface(&self, widget_id: i32) -> Option<SurfaceState> {
        self.surfaces
            .lock()
            .ok()
            .and_then(|surfaces| surfaces.get(&widget_id).cloned())
    }

    /// Every push received, in arrival order
    pub fn pushes(&self) -> Vec<(i32, SurfaceUpdate)> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Pushes received for one widget
    pub fn pushes_for(&self, widget_id: i32) -> Vec<SurfaceUpdate> {
        self.pushes()
            .into_iter()
            .filter(|(id, _)| *id == widget_id)
            .map(|(_, update)| update)
            .collect()
    }

    fn record(&self, widget_id: i32, update: SurfaceUpdate) -> ComposeResult<()> {
        self.surfaces
            .lock()
            .map_err(|e| ComposeError::Surface(e.to_string()))?
            .entry(widget_id)
            .or_default()
            .apply(&update);

        self.log
            .lock()
            .map_err(|e| ComposeError::Surface(e.to_string()))?
            .push((widget_id, update));
        Ok(())
    }
}

#[async_trait]
impl SurfaceSink for MemorySurfaceSink {
    async fn push(&self, widget_id: i32, update: SurfaceUpdate) -> ComposeResult<()> {
        debug!(widget_id, ops = update.ops().len(), "Surface push");
        self.record(widget_id, update)
    }
}

/// Non-image part of a surface, written as `surface.json`
#[derive(Debug, Serialize)]
struct SurfaceManifest<'a> {
    widget_id: i32,
    texts: &'a BTreeMap<Region, String>,
    visibility: &'a BTreeMap<Region, bool>,
    flip_intervals: &'a BTreeMap<Region, u32>,
    foreground_frames: &'a [String],
    padding: Option<u32>,
    placeholder: Option<Placeholder>,
}

/// Sink rendering each widget surface into `<output_dir>/<widget_id>/`
///
/// Only the folded state of each widget is kept. Pushes to one widget are
/// applied and written one at a time, so the files on disk always match the
/// latest applied state; different widgets write concurrently.
pub struct PngSurfaceSink {
    output_dir: PathBuf,
    surfaces: Mutex<HashMap<i32, Arc<tokio::sync::Mutex<SurfaceState>>>>,
}

impl PngSurfaceSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            surfaces: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, widget_id: i32) -> ComposeResult<Arc<tokio::sync::Mutex<SurfaceState>>> {
        let mut surfaces = self
            .surfaces
            .lock()
            .map_err(|e| ComposeError::Surface(e.to_string()))?;
        Ok(surfaces.entry(widget_id).or_default().clone())
    }
}

#[async_trait]
impl SurfaceSink for PngSurfaceSink {
    async fn push(&self, widget_id: i32, update: SurfaceUpdate) -> ComposeResult<()> {
        let slot = self.slot(widget_id)?;
        // Held across the write so a later snapshot cannot land first
        let mut state = slot.lock().await;
        state.apply(&update);
        let snapshot = state.clone();
        let dir = self.output_dir.join(widget_id.to_string());

        tokio::task::spawn_blocking(move || write_surface(&dir, widget_id, &snapshot))
            .await
            .map_err(|e| ComposeError::Surface(e.to_string()))?
    }
}

fn write_surface(dir: &Path, widget_id: i32, state: &SurfaceState) -> ComposeResult<()> {
    let io_err = |e: std::io::Error| ComposeError::Surface(format!("{}: {}", dir.display(), e));
    std::fs::create_dir_all(dir).map_err(io_err)?;

    for (region, bitmap) in &state.images {
        write_png(&dir.join(format!("{}.png", region)), bitmap)?;
    }
    for (region, frames) in &state.flipper_frames {
        for (i, bitmap) in frames.iter().enumerate() {
            write_png(&dir.join(format!("{}_{}.png", region, i)), bitmap)?;
        }
    }

    let manifest = SurfaceManifest {
        widget_id,
        texts: &state.texts,
        visibility: &state.visibility,
        flip_intervals: &state.flip_intervals,
        foreground_frames: &state.foreground_frames,
        padding: state.padding,
        placeholder: state.placeholder,
    };
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| ComposeError::Surface(e.to_string()))?;
    std::fs::write(dir.join("surface.json"), json).map_err(io_err)?;

    debug!(widget_id, dir = %dir.display(), "Surface written");
    Ok(())
}

fn write_png(path: &Path, bitmap: &Bitmap) -> ComposeResult<()> {
    if bitmap.is_empty() {
        warn!(path = %path.display(), "Skipping empty bitmap");
        return Ok(());
    }
    let image = image::RgbaImage::from_raw(bitmap.width(), bitmap.height(), bitmap.to_rgba8())
        .ok_or_else(|| ComposeError::Surface(format!("bad buffer for {}", path.display())))?;
    image
        .save(path)
        .map_err(|e| ComposeError::Surface(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::Color;

    #[tokio::test]
    async fn test_last_write_wins_per_region() {
        let sink = MemorySurfaceSink::new();
        let red = Bitmap::solid(2, 2, Color::rgb(255, 0, 0));
        let blue = Bitmap::solid(2, 2, Color::rgb(0, 0, 255));

        sink.push(1, SurfaceUpdate::new().image(Region::Content, red))
            .await
            .unwrap();
        sink.push(
            1,
            SurfaceUpdate::new()
                .image(Region::Content, blue.clone())
                .text(Region::SenderName, "Ann"),
        )
        .await
        .unwrap();

        let state = sink.surface(1).unwrap();
        assert_eq!(state.images[&Region::Content], blue);
        assert_eq!(state.texts[&Region::SenderName], "Ann");
        assert_eq!(sink.pushes_for(1).len(), 2);
    }

    #[test]
    fn test_placeholder_cleared_by_content() {
        let mut state = SurfaceState::default();
        state.apply(&SurfaceUpdate::placeholder(Placeholder::EmptyPhoto));
        assert_eq!(state.placeholder, Some(Placeholder::EmptyPhoto));

        state.apply(&SurfaceUpdate::new().image(Region::Content, Bitmap::new(1, 1)));
        assert_eq!(state.placeholder, None);
    }

    #[test]
    fn test_clear_flipper() {
        let mut state = SurfaceState::default();
        let frame = Bitmap::new(1, 1);
        state.apply(
            &SurfaceUpdate::new()
                .push(SurfaceOp::AddFlipperFrame {
                    region: Region::LiveFlipper,
                    bitmap: frame.clone(),
                })
                .push(SurfaceOp::AddFlipperFrame {
                    region: Region::LiveFlipper,
                    bitmap: frame,
                }),
        );
        assert_eq!(state.flipper_frames[&Region::LiveFlipper].len(), 2);

        state.apply(&SurfaceUpdate::new().push(SurfaceOp::ClearFlipper {
            region: Region::LiveFlipper,
        }));
        assert!(!state.flipper_frames.contains_key(&Region::LiveFlipper));
    }

    #[tokio::test]
    async fn test_png_sink_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = PngSurfaceSink::new(dir.path());
        sink.push(
            3,
            SurfaceUpdate::new()
                .image(Region::Content, Bitmap::solid(4, 4, Color::WHITE))
                .text(Region::SenderName, "Ann")
                .visible(Region::SenderGroup, true),
        )
        .await
        .unwrap();

        let widget_dir = dir.path().join("3");
        assert!(widget_dir.join("content.png").exists());
        let manifest = std::fs::read_to_string(widget_dir.join("surface.json")).unwrap();
        assert!(manifest.contains("\"sender_name\": \"Ann\""));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_png_sink_concurrent_pushes_keep_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let sink = PngSurfaceSink::new(dir.path());
        let manifest_path = dir.path().join("5").join("surface.json");

        for round in 0..20 {
            let first = sink.push(
                5,
                SurfaceUpdate::new().image(Region::Content, Bitmap::solid(2, 2, Color::WHITE)),
            );
            let second = sink.push(
                5,
                SurfaceUpdate::new().text(Region::SenderName, format!("Ann {}", round)),
            );
            let (a, b) = tokio::join!(first, second);
            a.unwrap();
            b.unwrap();

            let manifest = std::fs::read_to_string(&manifest_path).unwrap();
            let json: serde_json::Value = serde_json::from_str(&manifest).unwrap();
            assert_eq!(json["texts"]["sender_name"], format!("Ann {}", round));
        }
        assert_eq!(sink.surfaces.lock().unwrap().len(), 1);
    }
}
