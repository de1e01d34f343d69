//! Resolution error types

use thiserror::Error;

use crate::coordinate::Coordinate;

/// Coarse classification of a resolution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    NotFound,
    ChecksumMismatch,
    NetworkFailure,
    /// Bad input or repository metadata (coordinate syntax, POM content, cycles, cache I/O)
    Invalid,
}

/// Errors raised while resolving artifacts
///
/// Cloneable so that every waiter on a single-flight fetch receives the same failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    /// No repository has the artifact
    #[error("Artifact not found in any repository: {coordinate}")]
    NotFound { coordinate: Coordinate },

    /// Downloaded bytes do not match the published checksum
    #[error("Checksum mismatch for {coordinate}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        coordinate: Coordinate,
        expected: String,
        actual: String,
    },

    /// Transport or HTTP failure talking to a remote repository
    #[error("Network failure fetching {coordinate}: {message}")]
    NetworkFailure {
        coordinate: Coordinate,
        message: String,
    },

    /// Coordinate text could not be parsed
    #[error("Invalid coordinate '{input}': expected groupId:artifactId:version[:classifier]")]
    InvalidCoordinate { input: String },

    /// POM could not be read or is missing required data
    #[error("Malformed POM for {coordinate}: {message}")]
    MalformedPom {
        coordinate: Coordinate,
        message: String,
    },

    /// Dependency declarations form a cycle
    #[error("Circular dependency detected: {cycle}")]
    CyclicDependency { cycle: String },

    /// Local cache could not be read or written
    #[error("Artifact cache error for {coordinate}: {message}")]
    Cache {
        coordinate: Coordinate,
        message: String,
    },
}

impl ResolutionError {
    pub fn kind(&self) -> ResolutionErrorKind {
        match self {
            Self::NotFound { .. } => ResolutionErrorKind::NotFound,
            Self::ChecksumMismatch { .. } => ResolutionErrorKind::ChecksumMismatch,
            Self::NetworkFailure { .. } => ResolutionErrorKind::NetworkFailure,
            Self::InvalidCoordinate { .. }
            | Self::MalformedPom { .. }
            | Self::CyclicDependency { .. }
            | Self::Cache { .. } => ResolutionErrorKind::Invalid,
        }
    }

    /// The coordinate the failure is about, when there is one
    pub fn coordinate(&self) -> Option<&Coordinate> {
        match self {
            Self::NotFound { coordinate }
            | Self::ChecksumMismatch { coordinate, .. }
            | Self::NetworkFailure { coordinate, .. }
            | Self::MalformedPom { coordinate, .. }
            | Self::Cache { coordinate, .. } => Some(coordinate),
            Self::InvalidCoordinate { .. } | Self::CyclicDependency { .. } => None,
        }
    }

    pub fn not_found(coordinate: &Coordinate) -> Self {
        Self::NotFound {
            coordinate: coordinate.clone(),
        }
    }

    pub fn network(coordinate: &Coordinate, message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            coordinate: coordinate.clone(),
            message: message.into(),
        }
    }

    pub fn invalid_coordinate(input: impl Into<String>) -> Self {
        Self::InvalidCoordinate {
            input: input.into(),
        }
    }

    pub fn malformed_pom(coordinate: &Coordinate, message: impl Into<String>) -> Self {
        Self::MalformedPom {
            coordinate: coordinate.clone(),
            message: message.into(),
        }
    }

    pub fn cache(coordinate: &Coordinate, err: impl std::fmt::Display) -> Self {
        Self::Cache {
            coordinate: coordinate.clone(),
            message: err.to_string(),
        }
    }
}
