//! Configuration module for CozySync.
//!
//! Provides typed configuration structs that map to the YAML
//! configuration file, with loading, validation and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration for CozySync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sync: SyncConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Which directions of synchronization are active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Remote to local only; the local watcher is not started.
    Pull,
    /// Local to remote only; the remote watcher is not started.
    Push,
    /// Both directions.
    #[default]
    Full,
}

/// Synchronization engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Root directory of the local mirror.
    pub root: PathBuf,
    /// Direction of synchronization.
    pub mode: SyncMode,
    /// Seconds between connectivity probes while offline.
    pub offline_probe_interval: u64,
    /// Milliseconds to wait for a racing parent deletion before trashing
    /// a child on its own.
    pub trashing_delay: u64,
    /// Milliseconds of one remote-watcher polling cycle; used when
    /// waiting for the remote change feed to absorb a parent trashing.
    pub heartbeat: u64,
    /// Consecutive failures before a document is skipped until a newer
    /// revision supersedes it.
    pub max_doc_errors: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/Cozy"),
            mode: SyncMode::Full,
            offline_probe_interval: 60,
            trashing_delay: 1_000,
            heartbeat: 60_000,
            max_doc_errors: 3,
        }
    }
}

impl SyncConfig {
    /// The offline probe interval as a [`Duration`].
    pub fn offline_probe_interval(&self) -> Duration {
        Duration::from_secs(self.offline_probe_interval)
    }

    /// The trashing delay as a [`Duration`].
    pub fn trashing_delay(&self) -> Duration {
        Duration::from_millis(self.trashing_delay)
    }

    /// The remote-watcher heartbeat as a [`Duration`].
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat)
    }
}

/// Metadata store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("~/.local/share/cozysync/metadata.db"),
        }
    }
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Path to the log file; `None` logs to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any
    /// error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sync.max_doc_errors == 0 {
            anyhow::bail!("sync.max_doc_errors must be at least 1");
        }
        if self.sync.offline_probe_interval == 0 {
            anyhow::bail!("sync.offline_probe_interval must be at least 1 second");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
