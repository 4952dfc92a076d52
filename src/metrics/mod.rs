//! Metrics for widget composition and background jobs
//!
//! Components receive a [`MetricsReporter`] at construction; there is no
//! global registry. [`CompositionMetrics`] is the default counting
//! implementation, [`NoopReporter`] discards everything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::update::{JobKind, JobOutcome};

/// Composition budget per widget before a warning is logged
pub const TARGET_COMPOSE_TIME_MS: u64 = 250;

/// Sink for pipeline metrics
pub trait MetricsReporter: Send + Sync {
    /// A surface update was pushed to a widget
    fn record_push(&self, widget_id: i32);

    /// An image could not be resolved
    fn record_fetch_failure(&self, url: &str);

    /// One widget finished compositing
    fn record_composition(&self, widget_id: i32, duration: Duration);

    /// A background job finished one run
    fn record_job(&self, kind: JobKind, outcome: &JobOutcome, duration: Duration);
}

/// Reporter that drops every measurement
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl MetricsReporter for NoopReporter {
    fn record_push(&self, _widget_id: i32) {}
    fn record_fetch_failure(&self, _url: &str) {}
    fn record_composition(&self, _widget_id: i32, _duration: Duration) {}
    fn record_job(&self, _kind: JobKind, _outcome: &JobOutcome, _duration: Duration) {}
}

/// Running timing statistics
#[derive(Debug, Default, Clone, Copy)]
struct TimingStats {
    count: u64,
    avg: Duration,
    max: Duration,
    over_budget: u64,
}

impl TimingStats {
    fn record(&mut self, duration: Duration) {
        self.count += 1;

        if duration > self.max {
            self.max = duration;
        }

        // Running average
        let total = self.avg.as_nanos() * (self.count - 1) as u128 + duration.as_nanos();
        self.avg = Duration::from_nanos((total / self.count as u128) as u64);

        if duration.as_millis() > TARGET_COMPOSE_TIME_MS as u128 {
            self.over_budget += 1;
        }
    }
}

/// Counting reporter shared across concurrent jobs
#[derive(Debug, Default)]
pub struct CompositionMetrics {
    pushes: AtomicU64,
    fetch_failures: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_failed: AtomicU64,
    compose_timing: Mutex<TimingStats>,
    last_report: Mutex<Option<Instant>>,
}

impl CompositionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    pub fn jobs_succeeded(&self) -> u64 {
        self.jobs_succeeded.load(Ordering::Relaxed)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Average composition time per widget
    pub fn avg_compose_time(&self) -> Duration {
        self.compose_timing
            .lock()
            .map(|stats| stats.avg)
            .unwrap_or_default()
    }

    /// Log metrics summary if enough time has passed (every 60 seconds)
    pub fn maybe_log_summary(&self) {
        let Ok(mut last) = self.last_report.lock() else {
            return;
        };
        let should_log = match *last {
            None => true,
            Some(at) => at.elapsed() >= Duration::from_secs(60),
        };

        if should_log {
            self.log_summary();
            *last = Some(Instant::now());
        }
    }

    /// Log a summary of all metrics
    pub fn log_summary(&self) {
        let timing = self
            .compose_timing
            .lock()
            .map(|stats| *stats)
            .unwrap_or_default();
        tracing::debug!(
            pushes = self.pushes(),
            fetch_failures = self.fetch_failures(),
            jobs_succeeded = self.jobs_succeeded(),
            jobs_retried = self.jobs_retried(),
            jobs_failed = self.jobs_failed(),
            compositions = timing.count,
            avg_compose_ms = %(timing.avg.as_secs_f64() * 1000.0),
            max_compose_ms = %(timing.max.as_secs_f64() * 1000.0),
            over_budget = timing.over_budget,
            "Widget metrics summary"
        );
    }
}

impl MetricsReporter for CompositionMetrics {
    fn record_push(&self, _widget_id: i32) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fetch_failure(&self, _url: &str) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_composition(&self, widget_id: i32, duration: Duration) {
        if let Ok(mut stats) = self.compose_timing.lock() {
            stats.record(duration);
        }
        if duration.as_millis() > TARGET_COMPOSE_TIME_MS as u128 {
            tracing::warn!(
                widget_id,
                compose_ms = %(duration.as_secs_f64() * 1000.0),
                target_ms = TARGET_COMPOSE_TIME_MS,
                "Composition exceeded budget"
            );
        }
    }

    fn record_job(&self, kind: JobKind, outcome: &JobOutcome, duration: Duration) {
        let counter = match outcome {
            JobOutcome::Success => &self.jobs_succeeded,
            JobOutcome::Retry(_) => &self.jobs_retried,
            JobOutcome::Failure(_) => &self.jobs_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            kind = %kind,
            duration_ms = %(duration.as_secs_f64() * 1000.0),
            "Job metrics recorded"
        );
        self.maybe_log_summary();
    }
}

/// A simple timer for measuring operation duration
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Stop timer and return elapsed duration
    pub fn stop(self) -> Duration {
        self.start.elapsed()
    }
}
