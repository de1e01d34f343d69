//! # hivemq-testkit-core
//!
//! Shared foundation for the hivemq-testkit crates:
//! - Hierarchical configuration (embedded defaults, user file, environment)
//! - Error types for configuration loading
//! - Capped exponential backoff used by polling loops
//! - Tracing setup for test binaries

pub mod backoff;
pub mod config;
pub mod error;
pub mod logging;

pub use backoff::BackoffPolicy;
pub use config::{
    ConfigLoader, ContainerSettings, MavenSettings, ReadinessSettings, TestkitConfig,
};
pub use error::{Error, Result};
