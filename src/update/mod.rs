//! Background work scheduling for widgets
//!
//! Jobs are described by a [`WorkRequest`]: a kind, a primitive input bag,
//! constraints, a backoff policy and an optional dedup tag. Widget lifecycle
//! events map to requests through [`plan_jobs`]; [`WorkManager`] runs them.

pub mod jobs;
pub mod manager;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::error::{JobError, JobResult};
use crate::widget::ContentUpdate;

pub use jobs::{
    InitWorker, JobContext, RefreshWorker, RemoveWorker, SingleUpdateWorker, TokenRefreshWorker,
};
pub use manager::{JobId, WorkManager, Worker};

/// Dedup tag of the periodic refresh job
pub const REFRESH_TAG: &str = "widget_periodic_refresh";

/// Backoff used where no job-specific policy applies
pub const DEFAULT_BACKOFF: BackoffPolicy = BackoffPolicy::Exponential {
    base: Duration::from_secs(30),
};

/// Input keys
pub const KEY_WIDGET_IDS: &str = "widget_ids";
pub const KEY_UPDATE: &str = "update";
pub const KEY_TOKEN: &str = "token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    Init,
    PeriodicRefresh,
    SingleUpdate,
    TokenRefresh,
    Remove,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Init => "init",
            JobKind::PeriodicRefresh => "periodic_refresh",
            JobKind::SingleUpdate => "single_update",
            JobKind::TokenRefresh => "token_refresh",
            JobKind::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Result of one job run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Transient failure, run again after backoff
    Retry(String),
    /// Terminal failure
    Failure(String),
}

impl From<JobResult<()>> for JobOutcome {
    fn from(result: JobResult<()>) -> Self {
        match result {
            Ok(()) => JobOutcome::Success,
            Err(e) if e.is_transient() => JobOutcome::Retry(e.to_string()),
            Err(e) => JobOutcome::Failure(e.to_string()),
        }
    }
}

/// Lifecycle state of an enqueued job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Enqueued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

/// One primitive input value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobValue {
    Bool(bool),
    Int(i64),
    IntList(Vec<i64>),
    Str(String),
}

/// Primitive key/value job payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput(BTreeMap<String, JobValue>);

impl JobInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: JobValue) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn with_ids(self, key: &str, ids: &[i32]) -> Self {
        self.with(
            key,
            JobValue::IntList(ids.iter().map(|&id| i64::from(id)).collect()),
        )
    }

    pub fn with_str(self, key: &str, value: impl Into<String>) -> Self {
        self.with(key, JobValue::Str(value.into()))
    }

    pub fn get(&self, key: &str) -> Option<&JobValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Widget ids stored under `key`
    pub fn ids(&self, key: &'static str) -> JobResult<Vec<i32>> {
        match self.get(key) {
            Some(JobValue::IntList(values)) if !values.is_empty() => values
                .iter()
                .map(|&v| {
                    i32::try_from(v)
                        .map_err(|_| JobError::InvalidInput(format!("{} out of range: {}", key, v)))
                })
                .collect(),
            Some(JobValue::Int(v)) => i32::try_from(*v)
                .map(|id| vec![id])
                .map_err(|_| JobError::InvalidInput(format!("{} out of range: {}", key, v))),
            Some(JobValue::IntList(_)) | None => Err(JobError::MissingInput(key)),
            Some(other) => Err(JobError::InvalidInput(format!(
                "{} is not an id list: {:?}",
                key, other
            ))),
        }
    }

    pub fn str(&self, key: &'static str) -> JobResult<&str> {
        match self.get(key) {
            Some(JobValue::Str(value)) if !value.is_empty() => Ok(value),
            Some(JobValue::Str(_)) | None => Err(JobError::MissingInput(key)),
            Some(other) => Err(JobError::InvalidInput(format!(
                "{} is not a string: {:?}",
                key, other
            ))),
        }
    }
}

/// Preconditions for running a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Constraints {
    pub network_required: bool,
}

impl Constraints {
    pub const NETWORK: Constraints = Constraints {
        network_required: true,
    };
    pub const NONE: Constraints = Constraints {
        network_required: false,
    };
}

/// Delay schedule between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// A retry fails the run instead
    None,
    Linear { base: Duration },
    Exponential { base: Duration },
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based); `None` when no retry
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        let attempt = attempt.max(1);
        match self {
            BackoffPolicy::None => None,
            BackoffPolicy::Linear { base } => Some(base.saturating_mul(attempt)),
            BackoffPolicy::Exponential { base } => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                Some(base.saturating_mul(factor))
            }
        }
    }
}

/// Periodic cadence with a random flex window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub interval: Duration,
    pub flex: Duration,
}

impl Period {
    /// Next run delay, uniformly within `interval ± flex`
    pub fn next_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let flex = self.flex.min(self.interval);
        if flex.is_zero() {
            return self.interval;
        }
        let low = self.interval - flex;
        let high = self.interval + flex;
        Duration::from_secs_f64(rng.gen_range(low.as_secs_f64()..=high.as_secs_f64()))
    }
}

/// A job to enqueue
#[derive(Debug, Clone, PartialEq)]
pub struct WorkRequest {
    pub kind: JobKind,
    pub input: JobInput,
    pub constraints: Constraints,
    pub backoff: BackoffPolicy,
    pub max_retries: u32,
    pub tag: Option<String>,
    pub period: Option<Period>,
}

impl WorkRequest {
    pub fn new(kind: JobKind, input: JobInput) -> Self {
        Self {
            kind,
            input,
            constraints: Constraints::NETWORK,
            backoff: DEFAULT_BACKOFF,
            max_retries: SchedulerConfig::default().max_retries,
            tag: None,
            period: None,
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }

    /// Enroll and draw one newly placed widget
    pub fn init(widget_id: i32, config: &SchedulerConfig) -> Self {
        Self::new(JobKind::Init, JobInput::new().with_ids(KEY_WIDGET_IDS, &[widget_id]))
            .with_backoff(BackoffPolicy::Linear {
                base: config.init_backoff(),
            })
            .with_max_retries(config.max_retries)
    }

    /// Redraw every widget on a cadence, deduplicated by [`REFRESH_TAG`]
    pub fn periodic_refresh(config: &SchedulerConfig) -> Self {
        Self::new(JobKind::PeriodicRefresh, JobInput::new())
            .with_backoff(BackoffPolicy::None)
            .with_tag(REFRESH_TAG)
            .with_period(Period {
                interval: config.refresh_interval(),
                flex: config.refresh_flex(),
            })
    }

    /// Draw one pushed content update
    pub fn single_update(update: &ContentUpdate, config: &SchedulerConfig) -> JobResult<Self> {
        let payload = serde_json::to_string(update)
            .map_err(|e| JobError::InvalidInput(format!("update payload: {}", e)))?;
        Ok(
            Self::new(JobKind::SingleUpdate, JobInput::new().with_str(KEY_UPDATE, payload))
                .with_max_retries(config.max_retries),
        )
    }

    /// Forward a rotated push token
    pub fn token_refresh(token: &str, config: &SchedulerConfig) -> Self {
        Self::new(JobKind::TokenRefresh, JobInput::new().with_str(KEY_TOKEN, token))
            .with_max_retries(config.max_retries)
    }

    /// Purge removed widgets; runs offline and never retries
    pub fn remove(widget_ids: &[i32]) -> Self {
        Self::new(JobKind::Remove, JobInput::new().with_ids(KEY_WIDGET_IDS, widget_ids))
            .with_constraints(Constraints::NONE)
            .with_backoff(BackoffPolicy::None)
            .with_max_retries(0)
    }
}

/// Widget lifecycle events delivered by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WidgetEvent {
    Placed { ids: Vec<i32> },
    Removed { ids: Vec<i32> },
    ContentPushed { update: ContentUpdate },
    TokenRotated { token: String },
    Boot,
}

/// Work requests triggered by `event`
pub fn plan_jobs(
    event: &WidgetEvent,
    current_user: &str,
    config: &SchedulerConfig,
) -> JobResult<Vec<WorkRequest>> {
    let requests = match event {
        WidgetEvent::Placed { ids } => ids
            .iter()
            .map(|&id| WorkRequest::init(id, config))
            .chain(std::iter::once(WorkRequest::periodic_refresh(config)))
            .collect(),
        WidgetEvent::Removed { ids } if ids.is_empty() => Vec::new(),
        WidgetEvent::Removed { ids } => vec![WorkRequest::remove(ids)],
        WidgetEvent::ContentPushed { update } if update.sender_id == current_user => {
            tracing::debug!(sender = %update.sender_id, "Ignoring own content");
            Vec::new()
        }
        WidgetEvent::ContentPushed { update } => vec![WorkRequest::single_update(update, config)?],
        WidgetEvent::TokenRotated { token } => vec![WorkRequest::token_refresh(token, config)],
        WidgetEvent::Boot => vec![WorkRequest::periodic_refresh(config)],
    };
    Ok(requests)
}
