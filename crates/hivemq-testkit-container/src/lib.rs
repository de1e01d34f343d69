//! # hivemq-testkit-container
//!
//! Lifecycle control for a containerized HiveMQ broker:
//! - [`ContainerEngine`]: the blocking engine capability, with [`DockerCli`] as the
//!   production implementation
//! - [`ContainerController`]: the `Created -> ... -> Ready -> Stopped` state machine,
//!   extension injection, readiness polling and teardown
//! - [`EndpointResolver`]: host endpoints for exposed ports of a ready container
//! - [`reap_session`]: removal of containers leaked by this process

pub mod cancel;
pub mod controller;
pub mod docker;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod readiness;
pub mod reaper;
pub mod state;

pub use cancel::CancelToken;
pub use controller::{
    ContainerController, ContainerHandle, ContainerSpec, FileCopy, LifecycleSettings,
    CONTAINER_LOG_TARGET, EXTENSIONS_DIR,
};
pub use docker::DockerCli;
pub use endpoint::{EndpointResolver, HostPort};
pub use engine::{
    ContainerEngine, ContainerInspection, ContainerStatus, CreateRequest, ExecOutput, LogLine,
};
pub use error::{EndpointError, EngineError, LifecycleError, StartFailureKind};
pub use readiness::{port_accepts, LogPattern, ReadinessProbe};
pub use reaper::{reap_session, session_id, session_label, SESSION_LABEL};
pub use state::LifecycleState;
