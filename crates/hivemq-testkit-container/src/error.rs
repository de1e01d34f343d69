//! Error types for the container engine, the lifecycle controller and endpoint lookup

use hivemq_testkit_extension::AssemblyError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::state::LifecycleState;

/// Failures reported by a container engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("Port binding conflict: {message}")]
    PortConflict { message: String },

    #[error("Container engine rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    #[error("No such container: {id}")]
    NoSuchContainer { id: String },

    #[error("Container engine unavailable: {message}")]
    Unavailable { message: String },

    #[error("Unexpected container engine output: {message}")]
    Parse { message: String },

    #[error("Container engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

/// Why `start()` failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFailureKind {
    ImagePullFailed,
    EngineRejected,
    PortBindingConflict,
}

impl From<&EngineError> for StartFailureKind {
    fn from(error: &EngineError) -> Self {
        match error {
            EngineError::ImagePull { .. } => Self::ImagePullFailed,
            EngineError::PortConflict { .. } => Self::PortBindingConflict,
            _ => Self::EngineRejected,
        }
    }
}

impl fmt::Display for StartFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImagePullFailed => write!(f, "image pull failed"),
            Self::EngineRejected => write!(f, "engine rejected"),
            Self::PortBindingConflict => write!(f, "port binding conflict"),
        }
    }
}

/// Errors raised by [`ContainerController`](crate::ContainerController) operations
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// `configure` outside `Created`
    #[error("Container can only be configured before start (state: {state})")]
    Configuration { state: LifecycleState },

    #[error("Cannot {operation} while the container is {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("Failed to start container ({kind}): {message}")]
    StartFailure {
        kind: StartFailureKind,
        container_id: Option<String>,
        message: String,
    },

    #[error("Container {container_id} was not ready within {timeout:?}; last log lines:\n{log_tail}")]
    ReadinessTimeout {
        container_id: String,
        timeout: Duration,
        log_tail: String,
    },

    #[error("Container {container_id} exited before becoming ready; last log lines:\n{log_tail}")]
    ContainerExited {
        container_id: String,
        log_tail: String,
    },

    #[error("Waiting for container {container_id} was cancelled")]
    Cancelled { container_id: String },

    #[error("Container engine error for {container_id}: {source}")]
    Engine {
        container_id: String,
        #[source]
        source: EngineError,
    },

    #[error("Failed to stage extension: {0}")]
    Staging(#[from] AssemblyError),
}

impl LifecycleError {
    pub fn invalid_state(operation: &'static str, state: LifecycleState) -> Self {
        Self::InvalidState { operation, state }
    }

    pub fn engine(container_id: impl Into<String>, source: EngineError) -> Self {
        Self::Engine {
            container_id: container_id.into(),
            source,
        }
    }

    /// Diagnostic log lines carried by the error, if any
    pub fn log_tail(&self) -> Option<&str> {
        match self {
            Self::ReadinessTimeout { log_tail, .. } | Self::ContainerExited { log_tail, .. } => {
                Some(log_tail)
            }
            _ => None,
        }
    }
}

/// Errors raised when looking up a host endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Container is not ready (state: {state})")]
    NotReady { state: LifecycleState },

    #[error("Container port {port} is not exposed")]
    PortNotExposed { port: u16 },
}
