//! Widget composition engine
//!
//! Turns one [`ContentUpdate`] for one [`WidgetRegistration`] into surface
//! pushes. Composition runs in two steps: a pure [`plan`] picks the strategy
//! and overlay flags, then the engine executes it:
//!
//! - Mood, shaped and foreground strategies fetch their images concurrently
//!   and each fetch pushes its own regions when it completes.
//! - The live strategy fetches primary then secondary, composites both flip
//!   frames and pushes once. A missing primary skips the secondary fetch.
//!
//! A content image that cannot be fetched leaves its regions untouched. A
//! sender photo that cannot be fetched hides the avatar but still updates
//! the name.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{ComposeError, ComposeResult};
use crate::fetch::{ImageFetchClient, ImageRequest, Transformation};
use crate::metrics::{MetricsReporter, Timer};
use crate::render::{Bitmap, LivePhotoCompositor, DEFAULT_INSET_RATIO, DEFAULT_STROKE_WIDTH_RATIO};
use crate::style::{ShapeKind, StrokeDescriptor, WidgetStyle};
use crate::surface::{Region, SurfaceOp, SurfaceSink, SurfaceUpdate};
use crate::widget::{ContentMode, ContentUpdate, SenderInfo, WidgetRegistration};

/// Flip interval of the two live-photo frames
pub const LIVE_FLIP_INTERVAL_MS: u32 = 1000;

/// Compositing parameters shared by every widget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    /// Border width as a fraction of the shorter side
    pub stroke_width_ratio: f32,
    /// Live inset side as a fraction of the shorter side
    pub inset_ratio: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            stroke_width_ratio: DEFAULT_STROKE_WIDTH_RATIO,
            inset_ratio: DEFAULT_INSET_RATIO,
        }
    }
}

/// Which overlays the widget shows for an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    pub sender: bool,
    pub play_button: bool,
}

impl Visibility {
    pub fn compute(
        update: &ContentUpdate,
        registration: &WidgetRegistration,
        sender_info: Option<&SenderInfo>,
    ) -> Self {
        Self {
            sender: (sender_info.is_some() && registration.shows_sender_overlay())
                || update.is_mood(),
            play_button: update.is_video(),
        }
    }

    /// Flag operations carried by the content push
    ///
    /// The content push may hide the sender group but never shows it: only
    /// the sender push does, in the same update that writes the name.
    fn ops(&self) -> SurfaceUpdate {
        let update = SurfaceUpdate::new().visible(Region::PlayButton, self.play_button);
        if self.sender {
            update
        } else {
            update.visible(Region::SenderGroup, false)
        }
    }
}

/// Composition strategy for one update on one widget
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy<'a> {
    /// Unmodified content next to the circle-cropped sender
    Mood { sender: &'a SenderInfo },
    /// Sequential fetch of both captures, two flip frames, one push
    Live {
        secondary_link: &'a str,
        shape: ShapeKind,
        stroke: Option<&'a StrokeDescriptor>,
    },
    /// Shape-masked content, optionally with the sender overlay
    Shaped {
        shape: ShapeKind,
        stroke: Option<&'a StrokeDescriptor>,
    },
    /// Overlay frames built up front, unmasked content fetched after
    Foreground {
        asset: &'a str,
        frames: u32,
        interval: u32,
        padding: u32,
    },
}

/// Resolved plan for one composition job
#[derive(Debug, Clone, PartialEq)]
pub struct Plan<'a> {
    pub strategy: Strategy<'a>,
    pub visibility: Visibility,
    /// Link drawn in the content region
    pub source_link: &'a str,
    /// Sender overlay to fetch alongside the content, if shown
    pub sender: Option<&'a SenderInfo>,
}

/// Decide how to composite `update` onto `registration`
pub fn plan<'a>(
    update: &'a ContentUpdate,
    registration: &'a WidgetRegistration,
    sender_info: Option<&'a SenderInfo>,
) -> ComposeResult<Plan<'a>> {
    let visibility = Visibility::compute(update, registration, sender_info);
    let sender = sender_info.filter(|_| visibility.sender);

    let (shape, stroke) = match &registration.style {
        WidgetStyle::Shape { shape, stroke } => (*shape, stroke.as_ref()),
        WidgetStyle::Foreground { .. } => (ShapeKind::Rectangle, None),
    };

    let strategy = match &update.mode {
        ContentMode::Mood => Strategy::Mood {
            sender: sender_info.ok_or(ComposeError::MissingSenderInfo {
                widget_id: registration.id,
            })?,
        },
        ContentMode::Live { secondary_link } => Strategy::Live {
            secondary_link: secondary_link
                .as_deref()
                .filter(|link| !link.is_empty())
                .ok_or(ComposeError::MissingSecondaryImage {
                    widget_id: registration.id,
                })?,
            shape,
            stroke,
        },
        ContentMode::None | ContentMode::Video { .. } => match &registration.style {
            WidgetStyle::Shape { .. } => Strategy::Shaped { shape, stroke },
            WidgetStyle::Foreground {
                asset,
                frames,
                interval,
                padding,
            } => Strategy::Foreground {
                asset,
                frames: *frames,
                interval: *interval,
                padding: *padding,
            },
        },
    };

    Ok(Plan {
        strategy,
        visibility,
        source_link: update.source_link(),
        sender,
    })
}

/// Composites content updates onto widget surfaces
#[derive(Clone)]
pub struct WidgetCompositionEngine {
    fetcher: ImageFetchClient,
    sink: Arc<dyn SurfaceSink>,
    metrics: Arc<dyn MetricsReporter>,
    settings: RenderSettings,
}

impl WidgetCompositionEngine {
    pub fn new(
        fetcher: ImageFetchClient,
        sink: Arc<dyn SurfaceSink>,
        metrics: Arc<dyn MetricsReporter>,
    ) -> Self {
        Self {
            fetcher,
            sink,
            metrics,
            settings: RenderSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Composite `update` onto the widget and push the result
    ///
    /// Returns once every fetch has resolved and every resulting push has
    /// been delivered. Fails only on precondition violations: mood content
    /// without `sender_info`, or live content without a secondary link.
    #[instrument(skip_all, fields(widget_id = registration.id, sender = %update.sender_id))]
    pub async fn composite(
        &self,
        update: &ContentUpdate,
        registration: &WidgetRegistration,
        sender_info: Option<&SenderInfo>,
    ) -> ComposeResult<()> {
        let timer = Timer::start();
        let plan = plan(update, registration, sender_info)?;
        let widget_id = registration.id;

        debug!(strategy = ?plan.strategy, visibility = ?plan.visibility, "Composition planned");

        match plan.strategy {
            Strategy::Mood { sender } => {
                let content = self.push_content(
                    widget_id,
                    ImageRequest::new(plan.source_link),
                    plan.visibility.ops(),
                );
                let sender = self.push_sender(widget_id, sender, update.reaction.as_deref());
                tokio::join!(content, sender);
            }
            Strategy::Live {
                secondary_link,
                shape,
                stroke,
            } => {
                let live = self.push_live(
                    widget_id,
                    plan.source_link,
                    secondary_link,
                    shape,
                    stroke,
                    plan.visibility,
                );
                let sender = self.push_optional_sender(widget_id, plan.sender, update);
                tokio::join!(live, sender);
            }
            Strategy::Shaped { shape, stroke } => {
                let request = ImageRequest::new(plan.source_link).transform(Transformation::Shape {
                    shape,
                    stroke: stroke.cloned(),
                    stroke_width_ratio: self.settings.stroke_width_ratio,
                });
                let content = self.push_content(
                    widget_id,
                    request,
                    plan.visibility.ops().visible(Region::LiveFlipper, false),
                );
                let sender = self.push_optional_sender(widget_id, plan.sender, update);
                tokio::join!(content, sender);
            }
            Strategy::Foreground {
                asset,
                frames,
                interval,
                padding,
            } => {
                let mut overlay = plan
                    .visibility
                    .ops()
                    .visible(Region::LiveFlipper, false)
                    .push(SurfaceOp::ClearFlipper {
                        region: Region::ForegroundFlipper,
                    });
                for frame in 1..=frames {
                    overlay = overlay.push(SurfaceOp::AddForegroundFrame {
                        asset: format!("{}_{}", asset, frame),
                    });
                }
                overlay = overlay
                    .push(SurfaceOp::SetFlipInterval {
                        region: Region::ForegroundFlipper,
                        millis: interval,
                    })
                    .push(SurfaceOp::SetPadding { dp: padding })
                    .visible(Region::ForegroundFlipper, true);

                self.push_content(widget_id, ImageRequest::new(plan.source_link), overlay)
                    .await;
            }
        }

        self.metrics.record_composition(widget_id, timer.stop());
        Ok(())
    }

    /// Fetch the content image and push it together with `extra` ops
    async fn push_content(&self, widget_id: i32, request: ImageRequest, extra: SurfaceUpdate) {
        let Some(bitmap) = self.fetcher.fetch(&request).await else {
            warn!(widget_id, url = %request.url, "Content image unresolved, keeping previous");
            return;
        };

        let update = extra
            .image(Region::Content, bitmap)
            .visible(Region::Content, true);
        self.push(widget_id, update).await;
    }

    async fn push_optional_sender(
        &self,
        widget_id: i32,
        sender: Option<&SenderInfo>,
        update: &ContentUpdate,
    ) {
        if let Some(sender) = sender {
            self.push_sender(widget_id, sender, update.reaction.as_deref())
                .await;
        }
    }

    /// Fetch the circle-cropped sender photo and push it with the name
    ///
    /// The name is pushed even when the photo cannot be fetched; the avatar
    /// is hidden then, so a previous sender's face never sits next to it.
    async fn push_sender(&self, widget_id: i32, sender: &SenderInfo, reaction: Option<&str>) {
        let request = ImageRequest::new(&sender.photo_link).transform(Transformation::CircleCrop);
        let mut update = match self.fetcher.fetch(&request).await {
            Some(avatar) => SurfaceUpdate::new()
                .image(Region::SenderAvatar, avatar)
                .visible(Region::SenderAvatar, true),
            None => {
                warn!(
                    widget_id,
                    url = %sender.photo_link,
                    "Sender photo unresolved, hiding avatar"
                );
                SurfaceUpdate::new().visible(Region::SenderAvatar, false)
            }
        };

        update = update
            .text(Region::SenderName, &sender.name)
            .visible(Region::SenderGroup, true);
        update = match reaction {
            Some(emoji) => update
                .text(Region::Reaction, emoji)
                .visible(Region::Reaction, true),
            None => update.visible(Region::Reaction, false),
        };
        self.push(widget_id, update).await;
    }

    /// Primary then secondary, both flip frames, one push
    async fn push_live(
        &self,
        widget_id: i32,
        primary_link: &str,
        secondary_link: &str,
        shape: ShapeKind,
        stroke: Option<&StrokeDescriptor>,
        visibility: Visibility,
    ) {
        let Some(primary) = self.fetcher.fetch(&ImageRequest::new(primary_link)).await else {
            warn!(widget_id, url = %primary_link, "Live primary unresolved, skipping secondary");
            return;
        };

        let compositor = LivePhotoCompositor::new(shape, stroke.cloned())
            .with_inset_ratio(self.settings.inset_ratio)
            .with_stroke_width_ratio(self.settings.stroke_width_ratio);

        let Some(secondary) = self.fetcher.fetch(&ImageRequest::new(secondary_link)).await else {
            warn!(widget_id, url = %secondary_link, "Live secondary unresolved, showing still");
            let still = compositor.composite(&primary, &Bitmap::empty());
            let update = visibility
                .ops()
                .visible(Region::LiveFlipper, false)
                .image(Region::Content, still)
                .visible(Region::Content, true);
            self.push(widget_id, update).await;
            return;
        };

        let [front, back] = compositor.frames(&primary, &secondary);
        let update = visibility
            .ops()
            .visible(Region::Content, false)
            .push(SurfaceOp::ClearFlipper {
                region: Region::LiveFlipper,
            })
            .push(SurfaceOp::AddFlipperFrame {
                region: Region::LiveFlipper,
                bitmap: front,
            })
            .push(SurfaceOp::AddFlipperFrame {
                region: Region::LiveFlipper,
                bitmap: back,
            })
            .push(SurfaceOp::SetFlipInterval {
                region: Region::LiveFlipper,
                millis: LIVE_FLIP_INTERVAL_MS,
            })
            .visible(Region::LiveFlipper, true);
        self.push(widget_id, update).await;
    }

    async fn push(&self, widget_id: i32, update: SurfaceUpdate) {
        match self.sink.push(widget_id, update).await {
            Ok(()) => {
                self.metrics.record_push(widget_id);
                info!(widget_id, "Widget surface pushed");
            }
            Err(e) => warn!(widget_id, error = %e, "Surface push failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::{Color, StrokeDirection};

    fn mood_update() -> ContentUpdate {
        ContentUpdate::new("u1", "p1", "L").with_mode(ContentMode::Mood)
    }

    #[test]
    fn test_visibility_rules() {
        let rect = WidgetRegistration::new(1).with_sender_info(true);
        let info = SenderInfo::new("P", "Ann");
        let photo = ContentUpdate::new("u1", "p1", "L");

        assert!(Visibility::compute(&photo, &rect, Some(&info)).sender);
        assert!(!Visibility::compute(&photo, &rect, None).sender);

        let circle = rect
            .clone()
            .with_style(WidgetStyle::shape(ShapeKind::Circle));
        assert!(!Visibility::compute(&photo, &circle, Some(&info)).sender);
        assert!(Visibility::compute(&mood_update(), &circle, None).sender);

        let video = photo.with_mode(ContentMode::Video {
            id: "v".to_string(),
            thumb_link: "T".to_string(),
        });
        assert!(Visibility::compute(&video, &rect, None).play_button);
    }

    #[test]
    fn test_content_push_never_shows_sender_group() {
        let shown = Visibility {
            sender: true,
            play_button: false,
        };
        assert!(!shown
            .ops()
            .ops()
            .iter()
            .any(|op| matches!(op, SurfaceOp::SetVisible { region: Region::SenderGroup, .. })));

        let hidden = Visibility {
            sender: false,
            play_button: false,
        };
        assert!(hidden.ops().ops().contains(&SurfaceOp::SetVisible {
            region: Region::SenderGroup,
            visible: false,
        }));
    }

    #[test]
    fn test_mood_requires_sender_info() {
        let registration = WidgetRegistration::new(4);
        let update = mood_update();
        let result = plan(&update, &registration, None);
        assert!(matches!(
            result,
            Err(ComposeError::MissingSenderInfo { widget_id: 4 })
        ));
    }

    #[test]
    fn test_live_requires_secondary() {
        let registration = WidgetRegistration::new(4);
        let update = ContentUpdate::new("u1", "p1", "L").with_mode(ContentMode::Live {
            secondary_link: None,
        });
        assert!(matches!(
            plan(&update, &registration, None),
            Err(ComposeError::MissingSecondaryImage { .. })
        ));
    }

    #[test]
    fn test_video_uses_thumbnail_and_shape() {
        let stroke = StrokeDescriptor::new(vec![Color::WHITE], StrokeDirection::Vertical);
        let registration = WidgetRegistration::new(2).with_style(WidgetStyle::Shape {
            shape: ShapeKind::Heart,
            stroke: Some(stroke.clone()),
        });
        let update = ContentUpdate::new("u1", "p1", "L").with_mode(ContentMode::Video {
            id: "v".to_string(),
            thumb_link: "T".to_string(),
        });

        let plan = plan(&update, &registration, None).unwrap();
        assert_eq!(plan.source_link, "T");
        assert_eq!(
            plan.strategy,
            Strategy::Shaped {
                shape: ShapeKind::Heart,
                stroke: Some(&stroke),
            }
        );
        assert!(plan.sender.is_none());
    }

    #[test]
    fn test_foreground_strategy() {
        let registration = WidgetRegistration::new(3).with_style(WidgetStyle::Foreground {
            asset: "hearts".to_string(),
            frames: 3,
            interval: 400,
            padding: 12,
        });
        let update = ContentUpdate::new("u1", "p1", "L");
        let plan = plan(&update, &registration, None).unwrap();
        assert!(matches!(
            plan.strategy,
            Strategy::Foreground {
                asset: "hearts",
                frames: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_sender_dropped_when_overlay_hidden() {
        let registration = WidgetRegistration::new(5);
        let info = SenderInfo::new("P", "Ann");
        let update = ContentUpdate::new("u1", "p1", "L");
        let plan = plan(&update, &registration, Some(&info)).unwrap();
        assert!(plan.sender.is_none());
        assert!(!plan.visibility.sender);
    }
}
