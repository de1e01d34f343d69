//! Container engine capability
//!
//! The controller never talks to Docker directly; it drives a [`ContainerEngine`].
//! [`DockerCli`](crate::DockerCli) is the production implementation, tests use an
//! in-memory fake.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;

/// Everything needed to create a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    pub image: String,
    pub name: Option<String>,
    /// Container ports published on random host ports
    pub exposed_ports: Vec<u16>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// Engine-reported container status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Removing,
    Unknown,
}

impl ContainerStatus {
    pub fn parse(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            "removing" => Self::Removing,
            _ => Self::Unknown,
        }
    }

    /// The process is gone and will not come back on its own
    pub fn has_exited(self) -> bool {
        matches!(self, Self::Exited | Self::Dead | Self::Removing)
    }
}

/// Result of inspecting a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspection {
    pub status: ContainerStatus,
    /// When the engine last started the process; `None` if it never ran
    pub started_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    /// Container port -> host port
    pub port_bindings: BTreeMap<u16, u16>,
}

/// One timestamped line of container output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl LogLine {
    pub fn new(timestamp: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }
}

/// Output of a command run inside a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Blocking container engine operations
pub trait ContainerEngine: Send + Sync {
    /// Engine name for diagnostics
    fn name(&self) -> &'static str;

    /// Create (but do not start) a container; returns its id
    fn create(&self, request: &CreateRequest) -> Result<String, EngineError>;

    fn start(&self, id: &str) -> Result<(), EngineError>;

    /// Copy a host file or directory to `container_path`
    ///
    /// A directory's contents land inside `container_path`; missing parent
    /// directories are created.
    fn copy_into(&self, id: &str, host_path: &Path, container_path: &str)
        -> Result<(), EngineError>;

    fn exec(&self, id: &str, argv: &[&str]) -> Result<ExecOutput, EngineError>;

    /// Log lines, oldest first, optionally only those at or after `since`
    fn logs(&self, id: &str, since: Option<DateTime<Utc>>) -> Result<Vec<LogLine>, EngineError>;

    /// Ask the process to stop, killing it after `grace`
    fn stop(&self, id: &str, grace: Duration) -> Result<(), EngineError>;

    /// Force-remove the container and its anonymous volumes
    fn remove(&self, id: &str) -> Result<(), EngineError>;

    fn inspect(&self, id: &str) -> Result<ContainerInspection, EngineError>;

    /// Ids of all containers (running or not) carrying `label` (`key=value`)
    fn list_by_label(&self, label: &str) -> Result<Vec<String>, EngineError>;

    /// Host name under which published ports are reachable
    fn host(&self) -> String;
}
