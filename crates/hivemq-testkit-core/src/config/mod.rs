//! Configuration types and hierarchical loading

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{ContainerSettings, MavenSettings, ReadinessSettings, TestkitConfig};
