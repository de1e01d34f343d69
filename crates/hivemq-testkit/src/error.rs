//! Unified error type for hivemq-testkit

use hivemq_testkit_container::{EndpointError, EngineError, LifecycleError};
use hivemq_testkit_extension::{AssemblyError, ValidationError};
use hivemq_testkit_resolver::ResolutionError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using hivemq-testkit's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] hivemq_testkit_core::Error),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A file handed to the fixture builder is unusable
    #[error("Invalid file {}: {reason}", path.display())]
    InvalidFile { path: PathBuf, reason: String },
}

impl Error {
    pub fn invalid_file(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Diagnostic container log lines, for readiness failures
    pub fn log_tail(&self) -> Option<&str> {
        match self {
            Self::Lifecycle(e) => e.log_tail(),
            _ => None,
        }
    }
}
