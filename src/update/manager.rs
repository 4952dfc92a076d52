//! In-process job executor
//!
//! Holds enqueued [`WorkRequest`]s, runs the ready ones concurrently on the
//! tokio runtime and applies each request's retry, backoff and periodic
//! policy to the outcome.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::{JobInput, JobKind, JobOutcome, JobState, WorkRequest};
use crate::metrics::{MetricsReporter, Timer};

pub type JobId = u64;

/// Finished jobs kept for [`WorkManager::state`] queries; older ones are dropped
pub const FINISHED_RETENTION: usize = 64;

/// Body of a job kind
#[async_trait]
pub trait Worker: Send + Sync {
    async fn do_work(&self, input: &JobInput) -> JobOutcome;
}

/// Outcome of one job run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub id: JobId,
    pub kind: JobKind,
    pub outcome: JobOutcome,
}

struct Job {
    request: WorkRequest,
    state: JobState,
    /// Retries consumed so far
    attempts: u32,
    ready_at: Instant,
}

impl Job {
    fn is_runnable(&self, now: Instant, network: bool) -> bool {
        self.state == JobState::Enqueued
            && self.ready_at <= now
            && (network || !self.request.constraints.network_required)
    }
}

/// Runs background jobs with constraints, backoff and periodic rescheduling
pub struct WorkManager {
    workers: HashMap<JobKind, Arc<dyn Worker>>,
    jobs: Mutex<BTreeMap<JobId, Job>>,
    next_id: AtomicU64,
    network_available: AtomicBool,
    metrics: Arc<dyn MetricsReporter>,
}

impl WorkManager {
    pub fn new(metrics: Arc<dyn MetricsReporter>) -> Self {
        Self {
            workers: HashMap::new(),
            jobs: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            network_available: AtomicBool::new(true),
            metrics,
        }
    }

    /// Register the worker that runs jobs of `kind`
    pub fn with_worker(mut self, kind: JobKind, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(kind, worker);
        self
    }

    pub fn set_network_available(&self, available: bool) {
        self.network_available.store(available, Ordering::SeqCst);
        info!(available, "Network availability changed");
    }

    pub fn is_network_available(&self) -> bool {
        self.network_available.load(Ordering::SeqCst)
    }

    /// Enqueue a job, ready to run immediately
    pub fn enqueue(&self, request: WorkRequest) -> JobId {
        let mut jobs = self.lock_jobs();
        self.insert(&mut jobs, request)
    }

    /// Replace any not-yet-started job tagged `tag` with `request`
    pub fn enqueue_unique_periodic(&self, tag: &str, request: WorkRequest) -> JobId {
        let mut jobs = self.lock_jobs();
        let cancelled = Self::cancel_tagged(&mut jobs, tag);
        if cancelled > 0 {
            debug!(tag = %tag, cancelled, "Superseded pending periodic job");
            Self::prune_finished(&mut jobs);
        }
        self.insert(&mut jobs, request.with_tag(tag))
    }

    /// Enqueue `request`, deduplicating tagged periodic requests
    pub fn submit(&self, request: WorkRequest) -> JobId {
        match (&request.period, request.tag.clone()) {
            (Some(_), Some(tag)) => self.enqueue_unique_periodic(&tag, request),
            _ => self.enqueue(request),
        }
    }

    /// Cancel every not-yet-started job tagged `tag`
    pub fn cancel_by_tag(&self, tag: &str) -> usize {
        let mut jobs = self.lock_jobs();
        let cancelled = Self::cancel_tagged(&mut jobs, tag);
        Self::prune_finished(&mut jobs);
        cancelled
    }

    pub fn state(&self, id: JobId) -> Option<JobState> {
        self.lock_jobs().get(&id).map(|job| job.state)
    }

    /// When an enqueued job becomes ready
    pub fn next_run(&self, id: JobId) -> Option<Instant> {
        self.lock_jobs()
            .get(&id)
            .filter(|job| job.state == JobState::Enqueued)
            .map(|job| job.ready_at)
    }

    /// Number of enqueued jobs
    pub fn pending(&self) -> usize {
        self.lock_jobs()
            .values()
            .filter(|job| job.state == JobState::Enqueued)
            .count()
    }

    /// Run every ready job concurrently and settle the outcomes
    pub async fn run_pending(&self) -> Vec<JobReport> {
        let now = Instant::now();
        let network = self.is_network_available();

        let ready: Vec<(JobId, JobKind, JobInput)> = {
            let mut jobs = self.lock_jobs();
            let ready = jobs
                .iter_mut()
                .filter(|(_, job)| job.is_runnable(now, network))
                .map(|(id, job)| {
                    job.state = JobState::Running;
                    (*id, job.request.kind, job.request.input.clone())
                })
                .collect();
            ready
        };

        if ready.is_empty() {
            return Vec::new();
        }
        debug!(jobs = ready.len(), network, "Running ready jobs");

        let started: Vec<JobId> = ready.iter().map(|(id, _, _)| *id).collect();
        let mut set = JoinSet::new();
        for (id, kind, input) in ready {
            let worker = self.workers.get(&kind).cloned();
            set.spawn(async move {
                let timer = Timer::start();
                let outcome = match worker {
                    Some(worker) => run_job(worker, id, kind, input).await,
                    None => JobOutcome::Failure(format!("No worker registered for {}", kind)),
                };
                (id, kind, outcome, timer.stop())
            });
        }

        let mut reports = Vec::with_capacity(started.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, kind, outcome, duration)) => {
                    self.metrics.record_job(kind, &outcome, duration);
                    self.settle(id, &outcome);
                    reports.push(JobReport { id, kind, outcome });
                }
                Err(e) => error!(error = %e, "Job task aborted"),
            }
        }

        // Jobs whose task died never reported
        for id in started {
            if !reports.iter().any(|r| r.id == id) {
                self.settle(id, &JobOutcome::Failure("job task aborted".to_string()));
            }
        }

        reports.sort_by_key(|r| r.id);
        reports
    }

    /// Run rounds until no one-shot job is left waiting
    ///
    /// Sleeps through backoff delays. Periodic jobs run when ready but never
    /// keep the loop alive, and network-bound jobs stop it while offline.
    pub async fn run_until_idle(&self) -> Vec<JobReport> {
        let mut reports = Vec::new();
        loop {
            reports.extend(self.run_pending().await);

            let network = self.is_network_available();
            let next = self
                .lock_jobs()
                .values()
                .filter(|job| {
                    job.state == JobState::Enqueued
                        && job.request.period.is_none()
                        && (network || !job.request.constraints.network_required)
                })
                .map(|job| job.ready_at)
                .min();

            match next {
                Some(at) => {
                    debug!(
                        wait_secs = at.saturating_duration_since(Instant::now()).as_secs(),
                        "Waiting for backoff"
                    );
                    tokio::time::sleep_until(at).await;
                }
                None => break,
            }
        }
        reports
    }

    fn settle(&self, id: JobId, outcome: &JobOutcome) {
        let now = Instant::now();
        let mut jobs = self.lock_jobs();

        let superseded = {
            let Some(job) = jobs.get(&id) else {
                return;
            };
            job.request.tag.as_ref().is_some_and(|tag| {
                jobs.iter().any(|(other, j)| {
                    *other != id
                        && j.state == JobState::Enqueued
                        && j.request.tag.as_ref() == Some(tag)
                })
            })
        };

        let Some(job) = jobs.get_mut(&id) else {
            return;
        };

        let terminal = match outcome {
            JobOutcome::Success => JobState::Succeeded,
            JobOutcome::Retry(reason) => {
                job.attempts += 1;
                let delay = job
                    .request
                    .backoff
                    .delay(job.attempts)
                    .filter(|_| job.attempts <= job.request.max_retries);
                match delay {
                    Some(delay) => {
                        job.state = JobState::Enqueued;
                        job.ready_at = now + delay;
                        info!(
                            job_id = id,
                            kind = %job.request.kind,
                            attempt = job.attempts,
                            retry_in_secs = delay.as_secs(),
                            reason = %reason,
                            "Job scheduled for retry"
                        );
                        return;
                    }
                    None => {
                        warn!(
                            job_id = id,
                            kind = %job.request.kind,
                            attempts = job.attempts,
                            "Job out of retries"
                        );
                        JobState::Failed
                    }
                }
            }
            JobOutcome::Failure(_) => JobState::Failed,
        };

        match job.request.period {
            Some(period) if !superseded => {
                let delay = period.next_delay(&mut rand::thread_rng());
                job.attempts = 0;
                job.state = JobState::Enqueued;
                job.ready_at = now + delay;
                debug!(job_id = id, next_in_secs = delay.as_secs(), "Periodic job rescheduled");
            }
            _ => {
                job.state = terminal;
                Self::prune_finished(&mut jobs);
            }
        }
    }

    /// Drop the oldest finished jobs beyond [`FINISHED_RETENTION`]
    fn prune_finished(jobs: &mut BTreeMap<JobId, Job>) {
        let finished: Vec<JobId> = jobs
            .iter()
            .filter(|(_, job)| job.state.is_finished())
            .map(|(id, _)| *id)
            .collect();
        let excess = finished.len().saturating_sub(FINISHED_RETENTION);
        for id in &finished[..excess] {
            jobs.remove(id);
        }
        if excess > 0 {
            debug!(dropped = excess, "Pruned finished jobs");
        }
    }

    fn insert(&self, jobs: &mut BTreeMap<JobId, Job>, request: WorkRequest) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(job_id = id, kind = %request.kind, tag = ?request.tag, "Job enqueued");
        jobs.insert(
            id,
            Job {
                ready_at: Instant::now(),
                request,
                state: JobState::Enqueued,
                attempts: 0,
            },
        );
        id
    }

    fn cancel_tagged(jobs: &mut BTreeMap<JobId, Job>, tag: &str) -> usize {
        let mut cancelled = 0;
        for job in jobs.values_mut() {
            if job.state == JobState::Enqueued && job.request.tag.as_deref() == Some(tag) {
                job.state = JobState::Cancelled;
                cancelled += 1;
            }
        }
        cancelled
    }

    fn lock_jobs(&self) -> MutexGuard<'_, BTreeMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[instrument(skip_all, fields(job_id = id, kind = %kind))]
async fn run_job(worker: Arc<dyn Worker>, id: JobId, kind: JobKind, input: JobInput) -> JobOutcome {
    info!("Job started");
    let outcome = worker.do_work(&input).await;
    match &outcome {
        JobOutcome::Success => info!("Job succeeded"),
        JobOutcome::Retry(reason) => warn!(reason = %reason, "Job requested retry"),
        JobOutcome::Failure(reason) => error!(reason = %reason, "Job failed"),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::metrics::{CompositionMetrics, NoopReporter};
    use crate::update::{BackoffPolicy, REFRESH_TAG};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Scripted {
        outcome: JobOutcome,
        runs: AtomicUsize,
    }

    impl Scripted {
        fn new(outcome: JobOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                runs: AtomicUsize::new(0),
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Worker for Scripted {
        async fn do_work(&self, _input: &JobInput) -> JobOutcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn manager(kind: JobKind, worker: Arc<Scripted>) -> WorkManager {
        WorkManager::new(Arc::new(NoopReporter)).with_worker(kind, worker)
    }

    #[tokio::test]
    async fn test_periodic_reenqueue_cancels_pending() {
        let worker = Scripted::new(JobOutcome::Success);
        let manager = manager(JobKind::PeriodicRefresh, worker.clone());
        let config = SchedulerConfig::default();

        let first = manager.submit(WorkRequest::periodic_refresh(&config));
        let second = manager.submit(WorkRequest::periodic_refresh(&config));
        assert_eq!(manager.state(first), Some(JobState::Cancelled));

        let reports = manager.run_pending().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, second);
        assert_eq!(worker.runs(), 1);

        // Rescheduled for the next tick, not ready yet
        assert_eq!(manager.state(second), Some(JobState::Enqueued));
        assert!(manager.run_pending().await.is_empty());
        let next = manager.next_run(second).unwrap();
        assert!(next >= Instant::now() + Duration::from_secs(9 * 60));
    }

    #[tokio::test]
    async fn test_retry_uses_linear_backoff() {
        let worker = Scripted::new(JobOutcome::Retry("offline".to_string()));
        let manager = manager(JobKind::Init, worker.clone());
        let id = manager.enqueue(WorkRequest::init(7, &SchedulerConfig::default()));

        let reports = manager.run_pending().await;
        assert!(matches!(reports[0].outcome, JobOutcome::Retry(_)));
        assert_eq!(manager.state(id), Some(JobState::Enqueued));

        let wait = manager.next_run(id).unwrap() - Instant::now();
        assert!(wait > Duration::from_secs(110) && wait <= Duration::from_secs(120));
        assert!(manager.run_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let worker = Scripted::new(JobOutcome::Retry("offline".to_string()));
        let manager = manager(JobKind::Init, worker.clone());
        let request = WorkRequest::init(7, &SchedulerConfig::default()).with_max_retries(0);
        let id = manager.enqueue(request);

        manager.run_pending().await;
        assert_eq!(manager.state(id), Some(JobState::Failed));
    }

    #[tokio::test]
    async fn test_no_backoff_means_no_retry() {
        let worker = Scripted::new(JobOutcome::Retry("gone".to_string()));
        let manager = manager(JobKind::Remove, worker.clone());
        let id = manager.enqueue(WorkRequest::remove(&[1]).with_backoff(BackoffPolicy::None));

        manager.run_pending().await;
        assert_eq!(manager.state(id), Some(JobState::Failed));
    }

    #[tokio::test]
    async fn test_network_constraint() {
        let init = Scripted::new(JobOutcome::Success);
        let remove = Scripted::new(JobOutcome::Success);
        let manager = WorkManager::new(Arc::new(NoopReporter))
            .with_worker(JobKind::Init, init.clone())
            .with_worker(JobKind::Remove, remove.clone());
        manager.set_network_available(false);

        let init_id = manager.enqueue(WorkRequest::init(1, &SchedulerConfig::default()));
        let remove_id = manager.enqueue(WorkRequest::remove(&[2]));

        manager.run_pending().await;
        assert_eq!(manager.state(init_id), Some(JobState::Enqueued));
        assert_eq!(manager.state(remove_id), Some(JobState::Succeeded));
        assert_eq!(init.runs(), 0);

        manager.set_network_available(true);
        manager.run_pending().await;
        assert_eq!(manager.state(init_id), Some(JobState::Succeeded));
    }

    #[tokio::test]
    async fn test_missing_worker_fails() {
        let metrics = Arc::new(CompositionMetrics::new());
        let manager = WorkManager::new(metrics.clone());
        let id = manager.enqueue(WorkRequest::remove(&[1]));

        let reports = manager.run_pending().await;
        assert!(matches!(reports[0].outcome, JobOutcome::Failure(_)));
        assert_eq!(manager.state(id), Some(JobState::Failed));
        assert_eq!(metrics.jobs_failed(), 1);
    }

    #[tokio::test]
    async fn test_cancel_by_tag() {
        let worker = Scripted::new(JobOutcome::Success);
        let manager = manager(JobKind::PeriodicRefresh, worker.clone());
        manager.submit(WorkRequest::periodic_refresh(&SchedulerConfig::default()));

        assert_eq!(manager.cancel_by_tag(REFRESH_TAG), 1);
        assert!(manager.run_pending().await.is_empty());
        assert_eq!(worker.runs(), 0);
    }

    #[tokio::test]
    async fn test_finished_jobs_pruned() {
        let worker = Scripted::new(JobOutcome::Success);
        let manager = manager(JobKind::Remove, worker.clone());
        let mut ids: Vec<JobId> = (0..6)
            .map(|i| manager.enqueue(WorkRequest::remove(&[i])))
            .collect();
        manager.run_pending().await;
        assert_eq!(manager.state(ids[0]), Some(JobState::Succeeded));

        ids.extend(
            (0..FINISHED_RETENTION as i32).map(|i| manager.enqueue(WorkRequest::remove(&[i]))),
        );
        manager.run_pending().await;
        assert_eq!(worker.runs(), ids.len());
        assert_eq!(manager.lock_jobs().len(), FINISHED_RETENTION);
        assert_eq!(manager.state(ids[0]), None);
        assert_eq!(manager.state(ids[5]), None);
        assert_eq!(manager.state(ids[6]), Some(JobState::Succeeded));
        assert_eq!(manager.state(*ids.last().unwrap()), Some(JobState::Succeeded));
    }

    #[tokio::test]
    async fn test_run_until_idle_ignores_periodic() {
        let worker = Scripted::new(JobOutcome::Success);
        let manager = manager(JobKind::PeriodicRefresh, worker.clone());
        manager.submit(WorkRequest::periodic_refresh(&SchedulerConfig::default()));

        let reports = manager.run_until_idle().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(manager.pending(), 1);
    }
}
