// Locket Widget - lifecycle event runner
// Applies one widget event: plans its jobs and runs them until they settle

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use locket_widget::{
    config::Config,
    dispatch::WidgetUpdateDispatcher,
    engine::WidgetCompositionEngine,
    fetch::{HttpImageLoader, ImageFetchClient},
    metrics::CompositionMetrics,
    sources::FixtureSources,
    surface::PngSurfaceSink,
    update::{
        plan_jobs, InitWorker, JobContext, JobKind, JobOutcome, RefreshWorker, RemoveWorker,
        SingleUpdateWorker, TokenRefreshWorker, WidgetEvent, WorkManager,
    },
    widget::{FileRegistry, RegistrationStore},
};

const USAGE: &str = "usage: locket-widget [--config PATH] <event.json>";

struct Args {
    config: Option<PathBuf>,
    event: PathBuf,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut config = None;
        let mut event = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = args.next().context("--config needs a path")?;
                    config = Some(PathBuf::from(path));
                }
                "--help" | "-h" => bail!(USAGE),
                _ if event.is_none() => event = Some(PathBuf::from(arg)),
                _ => bail!("unexpected argument '{}'\n{}", arg, USAGE),
            }
        }

        Ok(Self {
            config,
            event: event.context(USAGE)?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse(std::env::args().skip(1))?;

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing::debug!("Configuration loaded: {:?}", config);

    let content = tokio::fs::read_to_string(&args.event)
        .await
        .with_context(|| format!("Failed to read event file: {}", args.event.display()))?;
    let event: WidgetEvent = serde_json::from_str(&content).context("Failed to parse event")?;
    tracing::info!(event = ?event, user = %config.user_id, "Starting Locket Widget");

    let metrics = Arc::new(CompositionMetrics::new());
    let store: Arc<dyn RegistrationStore> = Arc::new(
        FileRegistry::open(&config.storage.registry_path)
            .await
            .context("Failed to open widget registry")?,
    );
    let sources = Arc::new(FixtureSources::load(&config.storage.sources_path).await?);

    let loader = HttpImageLoader::new(config.render.widget_size)
        .context("Failed to build image loader")?;
    let fetcher = ImageFetchClient::new(Arc::new(loader), metrics.clone());
    let sink = Arc::new(PngSurfaceSink::new(&config.storage.output_dir));
    let engine = WidgetCompositionEngine::new(fetcher, sink.clone(), metrics.clone())
        .with_settings(config.render.settings());
    let dispatcher = WidgetUpdateDispatcher::new(sources.clone(), Arc::new(engine), sink);

    let ctx = Arc::new(JobContext {
        user_id: config.user_id.clone(),
        store: store.clone(),
        social: sources.clone(),
        history: sources.clone(),
        tokens: sources,
        dispatcher,
    });

    let manager = WorkManager::new(metrics.clone())
        .with_worker(JobKind::Init, Arc::new(InitWorker::new(ctx.clone())))
        .with_worker(JobKind::PeriodicRefresh, Arc::new(RefreshWorker::new(ctx.clone())))
        .with_worker(JobKind::SingleUpdate, Arc::new(SingleUpdateWorker::new(ctx.clone())))
        .with_worker(JobKind::TokenRefresh, Arc::new(TokenRefreshWorker::new(ctx)))
        .with_worker(JobKind::Remove, Arc::new(RemoveWorker::new(store)));
    manager.set_network_available(config.scheduler.network_available);

    for request in plan_jobs(&event, &config.user_id, &config.scheduler)? {
        manager.submit(request);
    }

    let reports = manager.run_until_idle().await;
    let failed = reports
        .iter()
        .filter(|r| matches!(r.outcome, JobOutcome::Failure(_)))
        .count();

    metrics.log_summary();
    tracing::info!(
        jobs = reports.len(),
        failed,
        pending = manager.pending(),
        surfaces = %config.storage.output_dir.display(),
        "Event applied"
    );

    if failed > 0 {
        bail!("{} job(s) failed", failed);
    }
    Ok(())
}
