//! Coordinates to packaged extension in one call

use hivemq_testkit_core::TestkitConfig;
use hivemq_testkit_extension::{
    ArchiveAssembler, ClassEntry, DescriptorFields, PackagedExtension, ResourceEntry,
};
use hivemq_testkit_resolver::{ArtifactCache, Coordinate, DependencyResolver};
use tracing::info;

use crate::error::Result;

/// Resolves third-party dependencies and assembles an extension around them
pub struct ExtensionPackager {
    resolver: DependencyResolver,
    assembler: ArchiveAssembler,
}

impl ExtensionPackager {
    pub fn new(resolver: DependencyResolver) -> Self {
        Self {
            resolver,
            assembler: ArchiveAssembler::new(),
        }
    }

    /// Packager over the configured Maven repositories with a fresh cache
    pub fn from_config(config: &TestkitConfig) -> Result<Self> {
        let resolver = DependencyResolver::from_settings(&config.maven, ArtifactCache::shared())?;
        Ok(Self::new(resolver))
    }

    /// Package with a `DISABLED` marker
    pub fn disabled_on_startup(mut self, disabled: bool) -> Self {
        self.assembler = self.assembler.disabled_on_startup(disabled);
        self
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Validate the descriptor, resolve `dependencies` and assemble
    ///
    /// The descriptor is checked before anything is downloaded.
    pub async fn package(
        &self,
        descriptor: &DescriptorFields,
        classes: &[ClassEntry],
        resources: &[ResourceEntry],
        dependencies: &[Coordinate],
    ) -> Result<PackagedExtension> {
        let validated = descriptor.clone().validate()?;
        let libs = self.resolver.resolve(dependencies).await?;
        let package = self.assembler.assemble(classes, resources, &libs, descriptor)?;

        info!(
            "Packaged extension {} {} with {} lib(s)",
            validated.id(),
            validated.version(),
            package.libs().len()
        );
        Ok(package)
    }
}
