//! Extension packaging for hivemq-testkit
//!
//! Turns compiled classes, resources and resolved jars into the directory layout a
//! HiveMQ broker loads extensions from. The descriptor is validated before anything
//! touches the filesystem.

pub mod assembler;
pub mod descriptor;
pub mod entry;
pub mod error;

pub use assembler::{
    ArchiveAssembler, LibEntry, PackagedExtension, StagedExtension, DISABLED_MARKER, LIB_DIR,
};
pub use descriptor::{DescriptorFields, ExtensionDescriptor, DESCRIPTOR_FILE_NAME};
pub use entry::{ClassEntry, ResourceEntry};
pub use error::{AssemblyError, ValidationError};
