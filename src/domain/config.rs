//! # Configuration
//!
//! Manages the loading and parsing of the application's configuration file (`config.yaml`).
//! Defines the structs for the Matrix account, the community channels, and the tunables
//! of the session engine and the fan-out engine.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::application::fanout::{FlushFailure, RetryPolicy};
use crate::domain::error::CoreError;

/// Main application configuration structure.
/// Matches the layout of `data/config.yaml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub services: ServicesConfig,
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

/// Configuration for various connected services.
#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    pub matrix: MatrixConfig,
}

/// Specific configuration for the Matrix service.
#[derive(Debug, Deserialize, Clone)]
pub struct MatrixConfig {
    pub username: String,
    pub password: String,
    pub homeserver: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Rooms the bot works with.
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelsConfig {
    /// Staff room receiving suggestions and feedback.
    pub staff: String,
    /// Public room whose posts are broadcast to subscribers.
    pub broadcast: String,
    /// Partner rooms; posts forwarded from them are not broadcast again.
    #[serde(default)]
    pub affiliated: Vec<String>,
    /// When set, only members of this room may suggest content or subscribe.
    #[serde(default)]
    pub membership_room: Option<String>,
}

/// System-level settings for the bot.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct SystemConfig {
    #[serde(default)]
    pub admin: Vec<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_idle_ttl_minutes")]
    pub idle_ttl_minutes: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_ttl_minutes: default_idle_ttl_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FanoutConfig {
    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub flush_failure: FlushFailure,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_backlog: default_max_backlog(),
            workers: default_workers(),
            flush_failure: FlushFailure::default(),
        }
    }
}

impl FanoutConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_backlog: self.max_backlog,
            workers: self.workers,
            flush_failure: self.flush_failure,
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct FeedbackConfig {
    /// Admins normally cannot record feedback; enable for testing.
    #[serde(default)]
    pub allow_admin: bool,
}

fn default_idle_ttl_minutes() -> u64 {
    30
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_max_backlog() -> usize {
    RetryPolicy::DEFAULT_MAX_BACKLOG
}
fn default_workers() -> usize {
    RetryPolicy::DEFAULT_WORKERS
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let matrix = &self.services.matrix;
        if matrix.homeserver.trim().is_empty() || matrix.username.trim().is_empty() {
            return Err(CoreError::validation("config", "matrix homeserver and username are required"));
        }
        if self.channels.staff.trim().is_empty() || self.channels.broadcast.trim().is_empty() {
            return Err(CoreError::validation("config", "staff and broadcast rooms are required"));
        }
        if self.fanout.workers == 0 {
            return Err(CoreError::validation("config", "fanout.workers must be at least 1"));
        }
        if self.fanout.max_backlog == 0 {
            return Err(CoreError::validation("config", "fanout.max_backlog must be at least 1"));
        }
        if self.sessions.idle_ttl_minutes == 0 || self.sessions.sweep_interval_secs == 0 {
            return Err(CoreError::validation("config", "session ttl and sweep interval must be positive"));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(self.system.data_dir.as_deref().unwrap_or("data"))
    }

    pub fn is_admin(&self, user: &str) -> bool {
        self.system.admin.iter().any(|a| a == user)
    }
}
