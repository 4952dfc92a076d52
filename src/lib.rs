//! Locket Widget Library
//!
//! Home-screen photo widget pipeline: shape and stroke compositing of shared
//! photos, fan-out of incoming content to the widgets that accept it, and the
//! background jobs that keep every widget current.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod render;
pub mod sources;
pub mod style;
pub mod surface;
pub mod update;
pub mod widget;

// Re-export commonly used types
pub use config::{Config, RenderConfig, SchedulerConfig, StorageConfig};
pub use dispatch::{route, Compositor, DispatchReport, Target, WidgetUpdateDispatcher};
pub use engine::{RenderSettings, WidgetCompositionEngine};
pub use error::{ComposeError, ConfigError, FetchError, JobError, SourceError, StoreError};
pub use fetch::{HttpImageLoader, ImageFetchClient, ImageLoader, ImageRequest, Transformation};
pub use metrics::{CompositionMetrics, MetricsReporter, NoopReporter, Timer};
pub use render::{Bitmap, LivePhotoCompositor, ShapeMask, StrokeCompositor};
pub use sources::{ContentHistory, FixtureSources, IdentitySource, SocialGraph, TokenRegistrar};
pub use style::{Color, ShapeKind, StrokeDescriptor, StrokeDirection, WidgetStyle};
pub use surface::{
    MemorySurfaceSink, Placeholder, PngSurfaceSink, Region, SurfaceOp, SurfaceSink, SurfaceUpdate,
};
pub use update::{
    plan_jobs, BackoffPolicy, JobKind, JobOutcome, JobState, WidgetEvent, WorkManager,
    WorkRequest,
};
pub use widget::{
    ContentMode, ContentUpdate, FileRegistry, MemoryRegistry, RegistrationStore, SenderInfo,
    WidgetRegistration,
};
