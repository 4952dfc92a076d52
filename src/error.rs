// Error types for the widget pipeline
//
// This module defines error types using thiserror, one enum per layer, so
// that the scheduler can tell transient failures from programmer errors.

use thiserror::Error;

/// Image fetch and decode errors
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    BadStatus { status: u16, url: String },

    #[error("Failed to decode image: {0}")]
    DecodeError(#[from] image::ImageError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image has zero size: {0}")]
    EmptyImage(String),

    #[error("Unsupported image source: {0}")]
    UnsupportedSource(String),
}

/// Composition errors signaled to the caller of the engine
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Mood content for widget {widget_id} requires sender info")]
    MissingSenderInfo { widget_id: i32 },

    #[error("Live content for widget {widget_id} has no secondary image")]
    MissingSecondaryImage { widget_id: i32 },

    #[error("Surface push failed: {0}")]
    Surface(String),
}

/// Registration store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access registry file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to (de)serialize registry: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Widget not registered: {0}")]
    UnknownWidget(i32),

    #[error("Invalid style for widget {widget_id}: {reason}")]
    InvalidStyle { widget_id: i32, reason: String },
}

/// Errors from external data sources (social graph, history, identity)
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    NoConfigDir,

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Background job errors
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Missing job input: {0}")]
    MissingInput(&'static str),

    #[error("Invalid job input: {0}")]
    InvalidInput(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Composition failed: {0}")]
    Compose(#[from] ComposeError),

    #[error("Registry failure: {0}")]
    Store(#[from] StoreError),
}

impl JobError {
    /// Whether the scheduler should retry the job
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }
}

impl From<SourceError> for JobError {
    fn from(err: SourceError) -> Self {
        JobError::Transient(err.to_string())
    }
}

// Convenience type aliases for common Result types
pub type FetchResult<T> = std::result::Result<T, FetchError>;
pub type ComposeResult<T> = std::result::Result<T, ComposeError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type SourceResult<T> = std::result::Result<T, SourceError>;
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type JobResult<T> = std::result::Result<T, JobError>;
