//! Host endpoints for exposed container ports

use serde::Serialize;
use std::fmt;

use crate::controller::ContainerHandle;
use crate::engine::ContainerEngine;
use crate::error::EndpointError;
use crate::state::LifecycleState;

/// Host and port under which a container port is reachable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Maps container ports to host endpoints
///
/// Resolution is a lookup in the bindings captured when the container reached
/// `Running`; it never touches the network.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    host: String,
}

impl EndpointResolver {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn for_engine(engine: &dyn ContainerEngine) -> Self {
        Self::new(engine.host())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Endpoint of `container_port`; only handed out for `Ready` containers
    pub fn endpoint_for(
        &self,
        handle: &ContainerHandle,
        container_port: u16,
    ) -> Result<HostPort, EndpointError> {
        if handle.state != LifecycleState::Ready {
            return Err(EndpointError::NotReady {
                state: handle.state,
            });
        }
        handle
            .port_bindings
            .get(&container_port)
            .map(|port| HostPort::new(self.host.clone(), *port))
            .ok_or(EndpointError::PortNotExposed {
                port: container_port,
            })
    }
}
