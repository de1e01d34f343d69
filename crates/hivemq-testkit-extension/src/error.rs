//! Error types for descriptor validation and extension assembly

use std::path::PathBuf;
use thiserror::Error;

/// A descriptor field is not well-formed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Extension id must not be empty")]
    EmptyId,

    #[error("Extension version must not be empty")]
    EmptyVersion,

    #[error("Extension {field} must not be negative (got {value})")]
    NegativePriority { field: &'static str, value: i64 },

    /// The broker reads priorities as Java ints
    #[error("Extension {field} {value} exceeds the maximum of {max}")]
    PriorityTooLarge {
        field: &'static str,
        value: i64,
        max: i64,
    },

    /// The id names the extension's directory, so it must be a single path segment
    #[error("Extension id '{id}' is not a valid directory name")]
    IllegalIdCharacter { id: String },
}

/// Errors raised while assembling or materializing a packaged extension
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Invalid extension descriptor: {0}")]
    InvalidDescriptor(#[from] ValidationError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two different payloads claim the same path in the extension layout
    #[error("Conflicting entries for '{path}' in extension layout")]
    DuplicateEntryConflict { path: String },

    #[error("Invalid entry path '{path}': must be relative and stay inside the extension")]
    InvalidEntryPath { path: String },

    #[error("Template error: {0}")]
    Template(String),

    /// An existing `hivemq-extension.xml` could not be read back
    #[error("Malformed extension descriptor: {message}")]
    MalformedDescriptor { message: String },
}

impl AssemblyError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn conflict(path: impl Into<String>) -> Self {
        Self::DuplicateEntryConflict { path: path.into() }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidEntryPath { path: path.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            message: message.into(),
        }
    }
}
