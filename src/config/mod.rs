// Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::RenderSettings;
use crate::error::{ConfigError, ConfigResult};

const APP_DIR: &str = "locket-widget";

/// Upper bound for any scheduler duration, one week
const MAX_SCHEDULE_MINS: u64 = 7 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signed-in user whose widgets are driven
    pub user_id: String,

    /// Background job policy
    pub scheduler: SchedulerConfig,

    /// Compositing parameters
    pub render: RenderConfig,

    /// Where registrations and rendered surfaces live
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Periodic refresh cadence in minutes
    pub refresh_interval_mins: u64,

    /// Allowed deviation from the cadence in minutes
    pub refresh_flex_mins: u64,

    /// Linear backoff base for widget init in minutes
    pub init_backoff_mins: u64,

    /// Retries before a job fails for good
    pub max_retries: u32,

    /// Initial network availability
    pub network_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Square widget surface side in pixels
    pub widget_size: u32,

    /// Border width relative to the shorter side
    pub stroke_width_ratio: f32,

    /// Live inset side relative to the shorter side
    pub inset_ratio: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub registry_path: PathBuf,

    /// Rendered widget surfaces
    pub output_dir: PathBuf,

    /// Friend lists, photo history and users for local runs
    pub sources_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            scheduler: SchedulerConfig::default(),
            render: RenderConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_mins: 15,
            refresh_flex_mins: 5,
            init_backoff_mins: 2,
            max_retries: 10,
            network_available: true,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            widget_size: 512,
            stroke_width_ratio: 0.04,
            inset_ratio: 0.34,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self {
            registry_path: data_dir.join("widgets.json"),
            output_dir: data_dir.join("surfaces"),
            sources_path: data_dir.join("sources.json"),
        }
    }
}

impl SchedulerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_mins.saturating_mul(60))
    }

    pub fn refresh_flex(&self) -> Duration {
        Duration::from_secs(self.refresh_flex_mins.saturating_mul(60))
    }

    pub fn init_backoff(&self) -> Duration {
        Duration::from_secs(self.init_backoff_mins.saturating_mul(60))
    }
}

impl RenderConfig {
    pub fn settings(&self) -> RenderSettings {
        RenderSettings {
            stroke_width_ratio: self.stroke_width_ratio,
            inset_ratio: self.inset_ratio,
        }
    }
}

impl Config {
    /// Load configuration from the default location or create it
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path`, writing defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;

            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            config
        };

        config.validate().context("Invalid config file")?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        let scheduler = &self.scheduler;
        if scheduler.refresh_interval_mins == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.refresh_interval_mins must be positive".to_string(),
            ));
        }
        for (name, mins) in [
            ("scheduler.refresh_interval_mins", scheduler.refresh_interval_mins),
            ("scheduler.init_backoff_mins", scheduler.init_backoff_mins),
        ] {
            if mins > MAX_SCHEDULE_MINS {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be at most {}, got {}",
                    name, MAX_SCHEDULE_MINS, mins
                )));
            }
        }
        if scheduler.refresh_flex_mins > scheduler.refresh_interval_mins {
            return Err(ConfigError::InvalidValue(format!(
                "scheduler.refresh_flex_mins ({}) exceeds refresh_interval_mins ({})",
                scheduler.refresh_flex_mins, scheduler.refresh_interval_mins
            )));
        }
        if self.render.widget_size == 0 {
            return Err(ConfigError::InvalidValue(
                "render.widget_size must be positive".to_string(),
            ));
        }
        for (name, ratio) in [
            ("render.stroke_width_ratio", self.render.stroke_width_ratio),
            ("render.inset_ratio", self.render.inset_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 0.5) {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be in (0, 0.5], got {}",
                    name, ratio
                )));
            }
        }
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;

        Ok(config_dir.join(APP_DIR).join("config.toml"))
    }
}
