//! Configuration data types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete testkit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct TestkitConfig {
    /// Container engine and broker image settings
    pub container: ContainerSettings,

    /// Readiness polling settings
    pub readiness: ReadinessSettings,

    /// Maven repository settings for dependency resolution
    pub maven: MavenSettings,
}

/// Container engine and broker image settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerSettings {
    /// Default broker image reference
    pub image: String,

    /// Docker CLI binary name or path
    pub docker_binary: String,

    /// Upper bound for the engine to report a started container as running
    pub start_timeout_secs: u64,

    /// Grace period given to the broker on stop before it is killed
    pub stop_grace_secs: u64,

    /// Label containers with the session id so they can be reaped
    pub reaper_enabled: bool,
}

impl ContainerSettings {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Readiness polling settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ReadinessSettings {
    /// Default readiness timeout
    pub timeout_secs: u64,

    /// First polling interval in milliseconds
    pub initial_interval_ms: u64,

    /// Polling interval cap in milliseconds
    pub max_interval_ms: u64,

    /// Growth factor between polls
    pub backoff_multiplier: f64,

    /// Number of log lines kept for diagnostics on failure
    pub log_tail_lines: usize,
}

impl ReadinessSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Maven repository settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct MavenSettings {
    /// Local repository directory (`~` is expanded)
    pub local_repository: String,

    /// Remote repositories, tried in order
    pub remote_repositories: Vec<String>,

    /// HTTP timeout for a single download
    pub http_timeout_secs: u64,
}

impl MavenSettings {
    /// Local repository with `~` and environment variables expanded
    pub fn local_repository_path(&self) -> PathBuf {
        match shellexpand::full(&self.local_repository) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(_) => PathBuf::from(&self.local_repository),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
