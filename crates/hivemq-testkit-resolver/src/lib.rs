//! Maven dependency resolution for extension packaging
//!
//! This crate handles:
//! - Maven coordinates and repository layout
//! - A shareable, single-flight artifact cache
//! - Local and remote repository access with checksum verification
//! - POM parsing with parent, property and BOM inheritance
//! - Transitive resolution in dependency-first (topological) order

pub mod cache;
pub mod coordinate;
pub mod error;
pub mod pom;
pub mod resolver;
pub mod source;

pub use cache::{ArtifactCache, SingleFlight};
pub use coordinate::{ArtifactKey, Coordinate};
pub use error::{ResolutionError, ResolutionErrorKind};
pub use resolver::{DependencyResolver, ResolvedArtifact};
pub use source::{ArtifactSource, MavenRepositories};
