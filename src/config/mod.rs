//! Daemon configuration
//!
//! Loaded from `$POSTBOX_CONFIG` (or `postbox.toml` in the working
//! directory) when present. Every field has a serde default so a missing
//! file still yields a runnable config.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::types::error::PostboxError;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub imap: ImapTuning,
}

/// Daemon-wide knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// SQLite database holding the user records
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Number of work-pool slots fronting the database
    #[serde(default = "default_pool_workers")]
    pub pool_workers: usize,

    /// Bounded queue depth per pool slot
    #[serde(default = "default_pool_queue_depth")]
    pub pool_queue_depth: usize,

    /// Suppress verbose logs and metrics (load testing)
    #[serde(default)]
    pub stress_test: bool,
}

/// IMAP session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapTuning {
    /// Re-issue IDLE after this many minutes (stay under 29-minute NAT timeouts)
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            pool_workers: default_pool_workers(),
            pool_queue_depth: default_pool_queue_depth(),
            stress_test: false,
        }
    }
}

impl Default for ImapTuning {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: default_idle_timeout_minutes(),
        }
    }
}

fn default_database_path() -> PathBuf {
    data_dir().join("postbox.db")
}

fn default_pool_workers() -> usize {
    4
}

fn default_pool_queue_depth() -> usize {
    64
}

fn default_idle_timeout_minutes() -> u64 {
    20
}

/// Data directory for the daemon's own files.
fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("postbox")
}

impl AppConfig {
    /// Load the config file, falling back to defaults when absent.
    pub fn load() -> Result<Self, PostboxError> {
        let path = std::env::var("POSTBOX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("postbox.toml"));

        if !path.exists() {
            info!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| PostboxError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config: AppConfig = toml::from_str(&raw)?;

        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }
}
