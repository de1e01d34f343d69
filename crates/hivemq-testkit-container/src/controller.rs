//! Container lifecycle controller
//!
//! One [`ContainerController`] owns exactly one container from creation to removal.
//! Every operation checks the current [`LifecycleState`] first; unexpected engine
//! failures move the handle to `Failed`, which is terminal. A container id that was
//! ever recorded is held until the engine confirms removal, so `stop()` and `Drop`
//! can always reclaim it.

use chrono::{DateTime, Utc};
use hivemq_testkit_core::{BackoffPolicy, TestkitConfig};
use hivemq_testkit_extension::PackagedExtension;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::endpoint::{EndpointResolver, HostPort};
use crate::engine::{ContainerEngine, ContainerStatus, CreateRequest, ExecOutput, LogLine};
use crate::error::{EndpointError, EngineError, LifecycleError, StartFailureKind};
use crate::readiness::{port_accepts, LogPattern, ReadinessProbe};
use crate::reaper::{session_id, SESSION_LABEL};
use crate::state::LifecycleState;

/// Directory the broker loads extensions from
pub const EXTENSIONS_DIR: &str = "/opt/hivemq/extensions";

/// Tracing target container output is forwarded to
pub const CONTAINER_LOG_TARGET: &str = "hivemq_testkit::container_log";

const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Timing knobs for one controller
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSettings {
    /// Bound on the engine reporting the started container as running
    pub start_timeout: Duration,
    pub stop_grace: Duration,
    /// Default for callers that do not pass their own readiness timeout
    pub readiness_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Log lines attached to readiness failures
    pub log_tail_lines: usize,
    /// Label containers with the session id
    pub reaper_enabled: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(60),
            stop_grace: Duration::from_secs(10),
            readiness_timeout: Duration::from_secs(120),
            backoff: BackoffPolicy::default(),
            log_tail_lines: 50,
            reaper_enabled: true,
        }
    }
}

impl LifecycleSettings {
    pub fn from_config(config: &TestkitConfig) -> Self {
        Self {
            start_timeout: config.container.start_timeout(),
            stop_grace: config.container.stop_grace(),
            readiness_timeout: config.readiness.timeout(),
            backoff: BackoffPolicy::from_settings(&config.readiness),
            log_tail_lines: config.readiness.log_tail_lines,
            reaper_enabled: config.container.reaper_enabled,
        }
    }
}

/// A host file or directory copied into the container before start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCopy {
    pub host_path: PathBuf,
    pub container_path: String,
}

impl FileCopy {
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
        }
    }
}

/// Everything `configure` may change
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub exposed_ports: Vec<u16>,
    /// Extensions copied in before the broker starts
    pub extensions: Vec<PackagedExtension>,
    pub env: BTreeMap<String, String>,
    pub files: Vec<FileCopy>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn expose(&mut self, port: u16) {
        if !self.exposed_ports.contains(&port) {
            self.exposed_ports.push(port);
        }
    }

    /// Add an extension, replacing one with the same id
    pub fn add_extension(&mut self, extension: PackagedExtension) {
        self.extensions.retain(|e| e.id() != extension.id());
        self.extensions.push(extension);
    }
}

/// Snapshot of a controller's observable state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerHandle {
    pub container_id: Option<String>,
    pub image: String,
    pub state: LifecycleState,
    /// Container port -> host port, captured at the `Running` transition
    pub port_bindings: BTreeMap<u16, u16>,
}

/// Drives one broker container through its lifecycle
pub struct ContainerController {
    engine: Arc<dyn ContainerEngine>,
    settings: LifecycleSettings,
    spec: ContainerSpec,
    state: LifecycleState,
    container_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    port_bindings: BTreeMap<u16, u16>,
    cancel: CancelToken,
    /// Post-start log lines already forwarded to tracing
    forwarded_lines: usize,
}

impl ContainerController {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        settings: LifecycleSettings,
        spec: ContainerSpec,
    ) -> Self {
        Self {
            engine,
            settings,
            spec,
            state: LifecycleState::Created,
            container_id: None,
            started_at: None,
            port_bindings: BTreeMap::new(),
            cancel: CancelToken::new(),
            forwarded_lines: 0,
        }
    }

    /// Use a token handed out before the controller existed
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Engine-reported start time; log lines before it are ignored
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Token that cancels a blocking wait from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn handle(&self) -> ContainerHandle {
        ContainerHandle {
            container_id: self.container_id.clone(),
            image: self.spec.image.clone(),
            state: self.state,
            port_bindings: self.port_bindings.clone(),
        }
    }

    /// Change the [`ContainerSpec`]; only allowed before start
    pub fn configure<F>(&mut self, change: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(&mut ContainerSpec),
    {
        if self.state != LifecycleState::Created {
            return Err(LifecycleError::Configuration { state: self.state });
        }
        change(&mut self.spec);
        Ok(())
    }

    /// Create, provision and start the container; returns once the engine reports it running
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.state != LifecycleState::Created {
            return Err(LifecycleError::invalid_state("start", self.state));
        }
        self.transition(LifecycleState::Starting);

        let mut request = CreateRequest {
            image: self.spec.image.clone(),
            name: None,
            exposed_ports: self.spec.exposed_ports.clone(),
            env: self.spec.env.clone(),
            labels: self.spec.labels.clone(),
        };
        if self.settings.reaper_enabled {
            request
                .labels
                .insert(SESSION_LABEL.to_string(), session_id().to_string());
        }

        let id = match self.engine.create(&request) {
            Ok(id) => id,
            Err(e) => return Err(self.fail_start(e)),
        };
        self.container_id = Some(id.clone());

        if let Err(e) = self.provision(&id) {
            self.transition(LifecycleState::Failed);
            return Err(e);
        }
        if let Err(e) = self.engine.start(&id) {
            return Err(self.fail_start(e));
        }
        self.wait_running(&id)?;

        info!(
            "Container {} running ({})",
            id,
            self.port_bindings
                .iter()
                .map(|(c, h)| format!("{}->{}", c, h))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    /// Copy preloaded extensions and extra files into a created container
    fn provision(&self, id: &str) -> Result<(), LifecycleError> {
        for extension in &self.spec.extensions {
            let staged = extension.stage()?;
            let target = format!("{}/{}", EXTENSIONS_DIR, staged.id());
            if let Err(e) = self.engine.copy_into(id, staged.path(), &target) {
                return Err(start_failure(Some(id), e));
            }
            debug!("Preloaded extension {} into {}", staged.id(), id);
        }
        for file in &self.spec.files {
            if let Err(e) = self.engine.copy_into(id, &file.host_path, &file.container_path) {
                return Err(start_failure(Some(id), e));
            }
        }
        Ok(())
    }

    fn wait_running(&mut self, id: &str) -> Result<(), LifecycleError> {
        let deadline = Instant::now() + self.settings.start_timeout;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let delay = self.settings.backoff.delay(attempt);
            let inspection = match self.engine.inspect(id) {
                Ok(inspection) => inspection,
                Err(e) => return Err(self.fail_start(e)),
            };

            if inspection.status == ContainerStatus::Running {
                self.started_at = Some(inspection.started_at.unwrap_or_else(|| {
                    warn!("Engine reported no start time for {}; using host clock", id);
                    Utc::now()
                }));
                self.port_bindings = inspection.port_bindings;
                self.forwarded_lines = 0;
                self.transition(LifecycleState::Running);
                return Ok(());
            }
            if inspection.status.has_exited() {
                let message = format!(
                    "container exited with code {} before running",
                    inspection
                        .exit_code
                        .map_or_else(|| "unknown".to_string(), |c| c.to_string())
                );
                return Err(self.fail(LifecycleError::StartFailure {
                    kind: StartFailureKind::EngineRejected,
                    container_id: Some(id.to_string()),
                    message,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                let message = format!(
                    "not running within {:?} (status {:?})",
                    self.settings.start_timeout, inspection.status
                );
                return Err(self.fail(LifecycleError::StartFailure {
                    kind: StartFailureKind::EngineRejected,
                    container_id: Some(id.to_string()),
                    message,
                }));
            }
            if self.cancel.wait_timeout(delay.min(deadline - now)) {
                return Err(self.fail(LifecycleError::Cancelled {
                    container_id: id.to_string(),
                }));
            }
        }
    }

    /// Add an extension before start, or copy it into the running broker
    ///
    /// A live copy does not change the lifecycle state. The broker picks the
    /// extension up on its own; use [`wait_for_log`](Self::wait_for_log) to
    /// observe that.
    pub fn inject_extension(&mut self, extension: PackagedExtension) -> Result<(), LifecycleError> {
        if self.state == LifecycleState::Created {
            debug!("Extension {} will be preloaded", extension.id());
            self.spec.add_extension(extension);
            return Ok(());
        }
        let id = self.live_container("inject an extension")?;

        let staged = extension.stage()?;
        let target = format!("{}/{}", EXTENSIONS_DIR, staged.id());
        if let Err(e) = self.engine.copy_into(&id, staged.path(), &target) {
            return Err(self.fail(LifecycleError::engine(id, e)));
        }
        info!("Deployed extension {} into running container {}", staged.id(), id);
        Ok(())
    }

    /// Run a command inside the live container
    pub fn exec(&mut self, argv: &[&str]) -> Result<ExecOutput, LifecycleError> {
        let id = self.live_container("exec")?;
        match self.engine.exec(&id, argv) {
            Ok(output) => Ok(output),
            Err(e) => Err(self.fail(LifecycleError::engine(id, e))),
        }
    }

    /// Poll `probe` until it holds, moving `Running -> ReadinessPending -> Ready`
    ///
    /// Only log lines stamped at or after the engine-reported start time count.
    /// On timeout, exit or cancellation the handle moves to `Failed`. Calling this
    /// on a `Ready` handle returns immediately.
    pub fn wait_until_ready(
        &mut self,
        probe: &ReadinessProbe,
        timeout: Duration,
    ) -> Result<(), LifecycleError> {
        match self.state {
            LifecycleState::Ready => return Ok(()),
            LifecycleState::Running => {}
            state => return Err(LifecycleError::invalid_state("wait for readiness", state)),
        }
        let id = self.live_container("wait for readiness")?;
        self.transition(LifecycleState::ReadinessPending);

        let deadline = Instant::now() + timeout;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let delay = self.settings.backoff.delay(attempt);
            if self.cancel.is_cancelled() {
                return Err(self.fail(LifecycleError::Cancelled { container_id: id }));
            }

            let exited = match self.engine.inspect(&id) {
                Ok(inspection) => inspection.status.has_exited(),
                Err(e) => return Err(self.fail(LifecycleError::engine(id, e))),
            };
            let lines = match self.poll_logs(&id) {
                Ok(lines) => lines,
                Err(e) => return Err(self.fail(LifecycleError::engine(id, e))),
            };

            if exited {
                let log_tail = self.tail(&lines);
                return Err(self.fail(LifecycleError::ContainerExited {
                    container_id: id,
                    log_tail,
                }));
            }
            if probe.logs_satisfied(&lines) && self.ports_open(probe) {
                self.transition(LifecycleState::Ready);
                info!("Container {} ready", id);
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                for pattern in probe.pending_patterns(&lines) {
                    debug!("Readiness pattern {} not seen in {}", pattern, id);
                }
                let log_tail = self.tail(&lines);
                return Err(self.fail(LifecycleError::ReadinessTimeout {
                    container_id: id,
                    timeout,
                    log_tail,
                }));
            }
            if self.cancel.wait_timeout(delay.min(deadline - now)) {
                return Err(self.fail(LifecycleError::Cancelled { container_id: id }));
            }
        }
    }

    /// Wait until `pattern` shows up in lines stamped at or after `since`
    ///
    /// Meant for hot-deploy pickup lines. A timeout or cancellation is returned
    /// without changing the lifecycle state; an exited container moves to `Failed`.
    pub fn wait_for_log(
        &mut self,
        pattern: &LogPattern,
        since: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<(), LifecycleError> {
        let id = self.live_container("wait for a log line")?;
        let deadline = Instant::now() + timeout;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let delay = self.settings.backoff.delay(attempt);
            let lines = match self.poll_logs(&id) {
                Ok(lines) => lines,
                Err(e) => return Err(self.fail(LifecycleError::engine(id, e))),
            };
            let recent: Vec<LogLine> =
                lines.into_iter().filter(|l| l.timestamp >= since).collect();
            if pattern.is_satisfied(&recent) {
                debug!("Saw {} in {}", pattern, id);
                return Ok(());
            }

            match self.engine.inspect(&id) {
                Ok(inspection) if inspection.status.has_exited() => {
                    let log_tail = self.tail(&recent);
                    return Err(self.fail(LifecycleError::ContainerExited {
                        container_id: id,
                        log_tail,
                    }));
                }
                Ok(_) => {}
                Err(e) => return Err(self.fail(LifecycleError::engine(id, e))),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LifecycleError::ReadinessTimeout {
                    container_id: id,
                    timeout,
                    log_tail: self.tail(&recent),
                });
            }
            if self.cancel.wait_timeout(delay.min(deadline - now)) {
                return Err(LifecycleError::Cancelled { container_id: id });
            }
        }
    }

    /// Engine-clock instant just after the newest output line seen so far
    ///
    /// Take it before triggering an action and pass it to
    /// [`wait_for_log`](Self::wait_for_log), so that only output following the
    /// action counts. Host and daemon clocks are never compared.
    pub fn log_cursor(&mut self) -> Result<DateTime<Utc>, LifecycleError> {
        let id = self.live_container("read the log cursor")?;
        let lines = match self.poll_logs(&id) {
            Ok(lines) => lines,
            Err(e) => return Err(self.fail(LifecycleError::engine(id, e))),
        };
        let newest = lines.iter().map(|l| l.timestamp).max();
        Ok(match newest.or(self.started_at) {
            Some(at) => at + chrono::Duration::nanoseconds(1),
            None => Utc::now(),
        })
    }

    /// Container output since start, oldest first
    pub fn logs(&self) -> Result<Vec<LogLine>, LifecycleError> {
        let Some(id) = &self.container_id else {
            return Ok(Vec::new());
        };
        self.fetch_logs(id)
            .map_err(|e| LifecycleError::engine(id.as_str(), e))
    }

    /// Endpoint of an exposed container port; the handle must be `Ready`
    pub fn endpoint_for(&self, container_port: u16) -> Result<HostPort, EndpointError> {
        EndpointResolver::for_engine(self.engine.as_ref())
            .endpoint_for(&self.handle(), container_port)
    }

    /// Stop and remove the container
    ///
    /// Idempotent. From `Failed` it releases whatever container is still held and
    /// succeeds. Removal is attempted even when the graceful stop fails.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        match self.state {
            LifecycleState::Stopped => return Ok(()),
            LifecycleState::Failed => {
                self.release();
                return Ok(());
            }
            LifecycleState::Created => {
                self.transition(LifecycleState::Stopped);
                return Ok(());
            }
            _ => {}
        }

        self.transition(LifecycleState::Stopping);
        if let Some(id) = self.container_id.clone() {
            if let Err(e) = self.engine.stop(&id, self.settings.stop_grace) {
                warn!("Graceful stop of {} failed, removing anyway: {}", id, e);
            }
            match self.engine.remove(&id) {
                Ok(()) | Err(EngineError::NoSuchContainer { .. }) => {
                    self.container_id = None;
                }
                Err(e) => return Err(self.fail(LifecycleError::engine(id, e))),
            }
            info!("Container {} stopped and removed", id);
        }
        self.transition(LifecycleState::Stopped);
        Ok(())
    }

    /// Best-effort removal of a held container
    fn release(&mut self) {
        let Some(id) = self.container_id.take() else {
            return;
        };
        match self.engine.remove(&id) {
            Ok(()) | Err(EngineError::NoSuchContainer { .. }) => {
                debug!("Released container {}", id);
            }
            Err(e) => {
                warn!("Failed to release container {}: {}", id, e);
                self.container_id = Some(id);
            }
        }
    }

    fn live_container(&self, operation: &'static str) -> Result<String, LifecycleError> {
        match &self.container_id {
            Some(id) if self.state.is_live() => Ok(id.clone()),
            _ => Err(LifecycleError::invalid_state(operation, self.state)),
        }
    }

    fn fetch_logs(&self, id: &str) -> Result<Vec<LogLine>, EngineError> {
        let lines = self.engine.logs(id, self.started_at)?;
        Ok(match self.started_at {
            Some(started_at) => lines
                .into_iter()
                .filter(|l| l.timestamp >= started_at)
                .collect(),
            None => lines,
        })
    }

    /// Fetch post-start logs and forward the ones not seen yet to tracing
    fn poll_logs(&mut self, id: &str) -> Result<Vec<LogLine>, EngineError> {
        let lines = self.fetch_logs(id)?;
        for line in lines.iter().skip(self.forwarded_lines) {
            debug!(target: CONTAINER_LOG_TARGET, "{}", line.text);
        }
        self.forwarded_lines = self.forwarded_lines.max(lines.len());
        Ok(lines)
    }

    fn ports_open(&self, probe: &ReadinessProbe) -> bool {
        if probe.ports().is_empty() {
            return true;
        }
        let host = self.engine.host();
        probe.ports().iter().all(|port| match self.port_bindings.get(port) {
            Some(host_port) => port_accepts(&host, *host_port, PORT_PROBE_TIMEOUT),
            None => {
                debug!("Readiness port {} has no host binding", port);
                false
            }
        })
    }

    fn tail(&self, lines: &[LogLine]) -> String {
        let skip = lines.len().saturating_sub(self.settings.log_tail_lines);
        lines[skip..]
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn transition(&mut self, next: LifecycleState) {
        if !self.state.can_transition_to(next) {
            warn!("Ignoring lifecycle transition {} -> {}", self.state, next);
            return;
        }
        debug!(
            "Container {}: {} -> {}",
            self.container_id.as_deref().unwrap_or("<none>"),
            self.state,
            next
        );
        self.state = next;
    }

    fn fail(&mut self, error: LifecycleError) -> LifecycleError {
        self.transition(LifecycleState::Failed);
        error
    }

    fn fail_start(&mut self, error: EngineError) -> LifecycleError {
        let error = start_failure(self.container_id.as_deref(), error);
        self.fail(error)
    }
}

fn start_failure(container_id: Option<&str>, error: EngineError) -> LifecycleError {
    LifecycleError::StartFailure {
        kind: StartFailureKind::from(&error),
        container_id: container_id.map(String::from),
        message: error.to_string(),
    }
}

impl Drop for ContainerController {
    fn drop(&mut self) {
        if let Some(id) = &self.container_id {
            debug!("Releasing container {} on drop ({})", id, self.state);
            self.release();
        }
    }
}

impl std::fmt::Debug for ContainerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerController")
            .field("engine", &self.engine.name())
            .field("state", &self.state)
            .field("container_id", &self.container_id)
            .field("started_at", &self.started_at)
            .field("port_bindings", &self.port_bindings)
            .finish()
    }
}
