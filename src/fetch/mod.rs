//! Asynchronous image fetching with transform-on-fetch
//!
//! The engine treats every image fetch as one awaited operation that either
//! yields a transformed bitmap or `None`. Failures are logged and reported to
//! metrics here, never propagated: a failed fetch leaves its region as is.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};
use crate::metrics::MetricsReporter;
use crate::render::{circle_crop, Bitmap, ShapeMask, StrokeCompositor};
use crate::style::{ShapeKind, StrokeDescriptor};

/// Transformation applied to a fetched image before it is handed back
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Transformation {
    #[default]
    None,
    /// Square center crop clipped to a circle
    CircleCrop,
    /// Shape mask followed by an optional stroke
    Shape {
        shape: ShapeKind,
        stroke: Option<StrokeDescriptor>,
        stroke_width_ratio: f32,
    },
}

impl Transformation {
    pub fn apply(&self, image: &Bitmap) -> Bitmap {
        match self {
            Transformation::None => image.clone(),
            Transformation::CircleCrop => circle_crop(image),
            Transformation::Shape {
                shape,
                stroke,
                stroke_width_ratio,
            } => {
                let masked = ShapeMask::apply(image, *shape);
                match stroke {
                    Some(stroke) => StrokeCompositor::new(*shape)
                        .with_width_ratio(*stroke_width_ratio)
                        .apply(&masked, stroke),
                    None => masked,
                }
            }
        }
    }
}

/// One image to fetch
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub url: String,
    pub transformation: Transformation,
}

impl ImageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transformation: Transformation::None,
        }
    }

    pub fn transform(mut self, transformation: Transformation) -> Self {
        self.transformation = transformation;
        self
    }
}

/// Raw image transport
#[async_trait]
pub trait ImageLoader: Send + Sync {
    /// Load and decode the image at `url`
    async fn load(&self, url: &str) -> FetchResult<Bitmap>;
}

/// Fetches images through an [`ImageLoader`] and applies request transformations
#[derive(Clone)]
pub struct ImageFetchClient {
    loader: Arc<dyn ImageLoader>,
    metrics: Arc<dyn MetricsReporter>,
}

impl ImageFetchClient {
    pub fn new(loader: Arc<dyn ImageLoader>, metrics: Arc<dyn MetricsReporter>) -> Self {
        Self { loader, metrics }
    }

    /// Fetch and transform; `None` when the image cannot be resolved
    pub async fn fetch(&self, request: &ImageRequest) -> Option<Bitmap> {
        match self.loader.load(&request.url).await {
            Ok(image) if !image.is_empty() => {
                debug!(
                    url = %request.url,
                    width = image.width(),
                    height = image.height(),
                    "Image fetched"
                );
                Some(request.transformation.apply(&image))
            }
            Ok(_) => {
                warn!(url = %request.url, "Fetched image is empty");
                self.metrics.record_fetch_failure(&request.url);
                None
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Image fetch failed");
                self.metrics.record_fetch_failure(&request.url);
                None
            }
        }
    }
}

/// Loads `http(s)://` URLs with reqwest and `file://` URLs or plain paths from disk
pub struct HttpImageLoader {
    client: reqwest::Client,
    max_side: u32,
}

impl HttpImageLoader {
    /// `max_side` bounds the longer side of decoded images
    pub fn new(max_side: u32) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, max_side })
    }

    async fn read_bytes(&self, url: &str) -> FetchResult<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            debug!(url = %url, "Sending image request");
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::BadStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            return Ok(response.bytes().await?.to_vec());
        }

        let path = url.strip_prefix("file://").unwrap_or(url);
        if path.is_empty() || path.contains("://") {
            return Err(FetchError::UnsupportedSource(url.to_string()));
        }
        Ok(tokio::fs::read(path).await?)
    }
}

#[async_trait]
impl ImageLoader for HttpImageLoader {
    async fn load(&self, url: &str) -> FetchResult<Bitmap> {
        let bytes = self.read_bytes(url).await?;
        let rgba = image::load_from_memory(&bytes)?.to_rgba8();
        let (width, height) = (rgba.width(), rgba.height());

        let bitmap = Bitmap::from_rgba8(width, height, rgba.as_raw());
        if bitmap.is_empty() {
            return Err(FetchError::EmptyImage(url.to_string()));
        }
        Ok(bitmap.fit_within(self.max_side))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CompositionMetrics;
    use crate::style::{Color, StrokeDirection};

    struct FixedLoader(Option<Bitmap>);

    #[async_trait]
    impl ImageLoader for FixedLoader {
        async fn load(&self, url: &str) -> FetchResult<Bitmap> {
            self.0
                .clone()
                .ok_or_else(|| FetchError::UnsupportedSource(url.to_string()))
        }
    }

    fn client(image: Option<Bitmap>) -> (ImageFetchClient, Arc<CompositionMetrics>) {
        let metrics = Arc::new(CompositionMetrics::new());
        let client = ImageFetchClient::new(Arc::new(FixedLoader(image)), metrics.clone());
        (client, metrics)
    }

    #[tokio::test]
    async fn test_fetch_applies_transformation() {
        let (client, _) = client(Some(Bitmap::solid(30, 20, Color::WHITE)));
        let avatar = client
            .fetch(&ImageRequest::new("P").transform(Transformation::CircleCrop))
            .await
            .unwrap();
        assert_eq!((avatar.width(), avatar.height()), (20, 20));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_absorbed() {
        let (client, metrics) = client(None);
        assert!(client.fetch(&ImageRequest::new("missing")).await.is_none());
        assert_eq!(metrics.fetch_failures(), 1);
    }

    #[test]
    fn test_rectangle_without_stroke_is_untouched() {
        let image = Bitmap::solid(8, 8, Color::rgb(1, 2, 3));
        let transformation = Transformation::Shape {
            shape: ShapeKind::Rectangle,
            stroke: Some(StrokeDescriptor::new(vec![Color::WHITE], StrokeDirection::None)),
            stroke_width_ratio: 0.04,
        };
        assert_eq!(transformation.apply(&image), image);
    }

    #[tokio::test]
    async fn test_file_loader_reads_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        image::RgbaImage::from_pixel(40, 10, image::Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();

        let loader = HttpImageLoader::new(20).unwrap();
        let bitmap = loader.load(path.to_str().unwrap()).await.unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (20, 5));
        let pixel = bitmap.pixel(10, 2).unwrap();
        assert!(pixel[0] > 250 && pixel[1] < 5 && pixel[3] > 250, "{:?}", pixel);
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let loader = HttpImageLoader::new(64).unwrap();
        let result = loader.load("ftp://example.com/a.png").await;
        assert!(matches!(result, Err(FetchError::UnsupportedSource(_))));
    }
}
