// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! User configuration stored in `~/.dlsync/config.json`.
//!
//! Every field has a default, so a missing or partial file is fine. The
//! service URL can be overridden by `DLSYNC_BASE_URL` and then by `--url`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::DEFAULT_SERVICE_URL;
use crate::download::{ManagerConfig, PollConfig, PollFailurePolicy};

/// Environment variable overriding `base_url`.
pub const BASE_URL_ENV: &str = "DLSYNC_BASE_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Service API root, e.g. `http://localhost:8086/api`
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub poll_failure_policy: PollFailurePolicy,
}

fn default_base_url() -> String {
    DEFAULT_SERVICE_URL.to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stats_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            stats_interval_ms: default_stats_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_failure_policy: PollFailurePolicy::default(),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Apply the environment and command-line overrides, flag last.
    pub fn with_overrides(mut self, env_url: Option<String>, flag_url: Option<String>) -> Self {
        if let Some(url) = env_url.filter(|u| !u.trim().is_empty()) {
            self.base_url = url;
        }
        if let Some(url) = flag_url.filter(|u| !u.trim().is_empty()) {
            self.base_url = url;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Intervals below 50ms are raised to 50ms.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            poll: PollConfig {
                interval: Duration::from_millis(self.poll_interval_ms.max(50)),
                failure_policy: self.poll_failure_policy,
            },
            stats_interval: Duration::from_millis(self.stats_interval_ms.max(50)),
        }
    }
}

/// `~/.dlsync`, created if missing.
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    let dir = home.join(".dlsync");
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Load the user's config and apply `DLSYNC_BASE_URL`.
pub fn load_config() -> Result<Config> {
    let config = Config::load_from(&config_path()?)?;
    Ok(config.with_overrides(std::env::var(BASE_URL_ENV).ok(), None))
}

pub fn save_config(config: &Config) -> Result<()> {
    config.save_to(&config_path()?)
}
