//! Configuration Management
//!
//! Handles persistent configuration storage for cloudsync. Durations are
//! stored as plain integers so the file stays easy to edit by hand.

use crate::engine::{PollConfig, RetryPolicy, TimeoutOverrides, Timeouts};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENDPOINT_ENV: &str = "CLOUDSYNC_ENDPOINT";
pub const TOKEN_ENV: &str = "CLOUDSYNC_TOKEN";

/// Retry settings for remote calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter: policy.use_jitter,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            use_jitter: self.jitter,
        }
    }
}

/// Status polling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        let poll = PollConfig::default();
        Self {
            initial_interval_ms: poll.initial_interval.as_millis() as u64,
            max_interval_ms: poll.max_interval.as_millis() as u64,
            multiplier: poll.multiplier,
            jitter: poll.use_jitter,
        }
    }
}

impl PollSettings {
    pub fn to_poll_config(&self) -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            multiplier: self.multiplier,
            use_jitter: self.jitter,
        }
    }
}

/// Operation timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub create_secs: u64,
    pub read_secs: u64,
    pub update_secs: u64,
    pub delete_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        let timeouts = Timeouts::default();
        Self {
            create_secs: timeouts.create.as_secs(),
            read_secs: timeouts.read.as_secs(),
            update_secs: timeouts.update.as_secs(),
            delete_secs: timeouts.delete.as_secs(),
        }
    }
}

impl TimeoutSettings {
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            create: Duration::from_secs(self.create_secs),
            read: Duration::from_secs(self.read_secs),
            update: Duration::from_secs(self.update_secs),
            delete: Duration::from_secs(self.delete_secs),
        }
    }
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Control-plane endpoint, e.g. `https://database.us-ashburn-1.example.com`
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer token
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    /// Per resource type, keyed by registry key
    #[serde(default)]
    pub timeout_overrides: HashMap<String, TimeoutOverrides>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudsync").join("config.json"))
    }

    /// Load configuration from disk; a missing or unreadable file yields defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config file {:?}: {:#}", path, e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get effective endpoint (CLI > env > config)
    pub fn effective_endpoint(&self, cli: Option<&str>) -> Option<String> {
        pick(cli, std::env::var(ENDPOINT_ENV).ok(), self.endpoint.as_deref())
    }

    /// Get effective token (env > config)
    pub fn effective_token(&self) -> Option<String> {
        pick(None, std::env::var(TOKEN_ENV).ok(), self.token.as_deref())
    }
}

fn pick(cli: Option<&str>, env: Option<String>, file: Option<&str>) -> Option<String> {
    cli.map(str::to_string)
        .or(env)
        .or_else(|| file.map(str::to_string))
        .filter(|s| !s.trim().is_empty())
}
