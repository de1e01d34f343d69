//! # hivemq-testkit
//!
//! Integration testing for HiveMQ broker extensions. An extension is packaged from
//! compiled classes, resources and resolved Maven dependencies, loaded into a real
//! broker running in a container, and the broker's endpoints are handed to the test
//! once it is ready.
//!
//! ```no_run
//! use hivemq_testkit::{DescriptorFields, ExtensionPackager, HiveMqContainer, TestkitConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> hivemq_testkit::Result<()> {
//! let config = TestkitConfig::load()?;
//! let extension = ExtensionPackager::from_config(&config)?
//!     .package(&DescriptorFields::new("my-extension", "1.0.0"), &[], &[], &[])
//!     .await?;
//!
//! let mut broker = tokio::task::spawn_blocking(move || {
//!     HiveMqContainer::from_config(&config)
//!         .with_extension(extension)
//!         .with_startup_timeout(Duration::from_secs(60))
//!         .start()
//! })
//! .await
//! .expect("startup task")?;
//!
//! println!("MQTT at {}", broker.mqtt_endpoint()?);
//! broker.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod hivemq;
pub mod packager;

pub use error::{Error, Result};
pub use hivemq::{
    extension_started_line, extension_stopped_line, HiveMqContainer, LogLevel, RunningHiveMq,
    CONTROL_CENTER_PORT, DEBUG_PORT, DEFAULT_IMAGE, HIVEMQ_HOME, MQTT_PORT, STARTED_LINE,
};
pub use packager::ExtensionPackager;

pub use hivemq_testkit_container::{
    reap_session, CancelToken, ContainerEngine, DockerCli, HostPort, LifecycleState,
};
pub use hivemq_testkit_core::{logging::init_test_logging, TestkitConfig};
pub use hivemq_testkit_extension::{
    ArchiveAssembler, ClassEntry, DescriptorFields, ExtensionDescriptor, PackagedExtension,
    ResourceEntry,
};
pub use hivemq_testkit_resolver::{Coordinate, DependencyResolver};
