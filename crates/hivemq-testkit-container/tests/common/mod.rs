//! Shared test utilities for hivemq-testkit-container integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use hivemq_testkit_container::{
    ContainerEngine, ContainerInspection, ContainerStatus, CreateRequest, EngineError, ExecOutput,
    LifecycleSettings, LogLine,
};
use hivemq_testkit_core::BackoffPolicy;
use hivemq_testkit_extension::{ArchiveAssembler, DescriptorFields, PackagedExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

type ErrorFactory = Box<dyn Fn() -> EngineError + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CopyRecord {
    pub container_id: String,
    pub container_path: String,
    /// Files below the copied host path, relative and sorted
    pub files: Vec<String>,
}

struct FakeContainer {
    request: CreateRequest,
    status: ContainerStatus,
    started_at: Option<DateTime<Utc>>,
    logs: Vec<LogLine>,
    port_bindings: BTreeMap<u16, u16>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    containers: BTreeMap<String, FakeContainer>,
    calls: Vec<String>,
    copies: Vec<CopyRecord>,
    execs: Vec<Vec<String>>,
}

/// In-memory container engine
///
/// `logs` ignores `since` and returns everything, old lines included, so the
/// controller's own start-time filtering is what gets tested.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
    failures: Mutex<BTreeMap<&'static str, ErrorFactory>>,
    seeded: Mutex<Vec<String>>,
    scheduled: Mutex<Vec<(Duration, String)>>,
    exit_after: Mutex<Option<Duration>>,
    clock_behind: Mutex<Duration>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Make every call of `operation` fail
    pub fn fail_on(
        &self,
        operation: &'static str,
        error: impl Fn() -> EngineError + Send + Sync + 'static,
    ) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation, Box::new(error));
    }

    /// Log line present in every new container, stamped a minute before creation
    pub fn seed_log(&self, text: &str) {
        self.seeded.lock().unwrap().push(text.to_string());
    }

    /// Log line appearing `after` the container started
    pub fn log_after_start(&self, after: Duration, text: &str) {
        self.scheduled
            .lock()
            .unwrap()
            .push((after, text.to_string()));
    }

    /// Container process exits `after` it started
    pub fn exit_after(&self, after: Duration) {
        *self.exit_after.lock().unwrap() = Some(after);
    }

    /// Run the engine's clock `behind` the host clock, like a drifting VM
    pub fn set_clock_behind(&self, behind: Duration) {
        *self.clock_behind.lock().unwrap() = behind;
    }

    /// Current time on the engine's clock
    fn now(&self) -> DateTime<Utc> {
        let behind = *self.clock_behind.lock().unwrap();
        Utc::now() - chrono::Duration::from_std(behind).unwrap()
    }

    /// Append a line to every running container's output now
    pub fn emit(&self, text: &str) {
        let now = self.now();
        for container in self.state().containers.values_mut() {
            if container.status == ContainerStatus::Running {
                container.logs.push(LogLine::new(now, text));
            }
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == operation).count()
    }

    pub fn copies(&self) -> Vec<CopyRecord> {
        self.state().copies.clone()
    }

    pub fn execs(&self) -> Vec<Vec<String>> {
        self.state().execs.clone()
    }

    pub fn container_ids(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    pub fn labels(&self, id: &str) -> BTreeMap<String, String> {
        self.state()
            .containers
            .get(id)
            .map(|c| c.request.labels.clone())
            .unwrap_or_default()
    }

    fn record(&self, operation: &'static str) -> Result<(), EngineError> {
        self.state().calls.push(operation.to_string());
        match self.failures.lock().unwrap().get(operation) {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }

    fn missing(id: &str) -> EngineError {
        EngineError::NoSuchContainer { id: id.to_string() }
    }
}

impl ContainerEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn create(&self, request: &CreateRequest) -> Result<String, EngineError> {
        self.record("create")?;
        let seeded_at = self.now() - chrono::Duration::seconds(60);
        let logs = self
            .seeded
            .lock()
            .unwrap()
            .iter()
            .map(|text| LogLine::new(seeded_at, text.as_str()))
            .collect();

        let mut state = self.state();
        state.next_id += 1;
        let id = format!("fake-{:04}", state.next_id);
        let port_bindings = request
            .exposed_ports
            .iter()
            .enumerate()
            .map(|(i, port)| (*port, 49_000 + state.next_id as u16 * 10 + i as u16))
            .collect();
        state.containers.insert(
            id.clone(),
            FakeContainer {
                request: request.clone(),
                status: ContainerStatus::Created,
                started_at: None,
                logs,
                port_bindings,
            },
        );
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<(), EngineError> {
        self.record("start")?;
        let scheduled = self.scheduled.lock().unwrap().clone();
        let mut state = self.state();
        let container = state.containers.get_mut(id).ok_or_else(|| Self::missing(id))?;

        let started_at = self.now();
        container.status = ContainerStatus::Running;
        container.started_at = Some(started_at);
        for (after, text) in scheduled {
            let at = started_at + chrono::Duration::from_std(after).unwrap();
            container.logs.push(LogLine::new(at, text));
        }
        container.logs.sort_by_key(|l| l.timestamp);
        Ok(())
    }

    fn copy_into(&self, id: &str, host_path: &Path, container_path: &str) -> Result<(), EngineError> {
        self.record("copy")?;
        let mut state = self.state();
        if !state.containers.contains_key(id) {
            return Err(Self::missing(id));
        }
        let mut files = Vec::new();
        list_files(host_path, host_path, &mut files);
        files.sort();
        state.copies.push(CopyRecord {
            container_id: id.to_string(),
            container_path: container_path.to_string(),
            files,
        });
        Ok(())
    }

    fn exec(&self, id: &str, argv: &[&str]) -> Result<ExecOutput, EngineError> {
        self.record("exec")?;
        let mut state = self.state();
        if !state.containers.contains_key(id) {
            return Err(Self::missing(id));
        }
        state.execs.push(argv.iter().map(|a| a.to_string()).collect());
        Ok(ExecOutput::default())
    }

    fn logs(&self, id: &str, _since: Option<DateTime<Utc>>) -> Result<Vec<LogLine>, EngineError> {
        self.record("logs")?;
        let now = self.now();
        let state = self.state();
        let container = state.containers.get(id).ok_or_else(|| Self::missing(id))?;
        Ok(container
            .logs
            .iter()
            .filter(|l| l.timestamp <= now)
            .cloned()
            .collect())
    }

    fn stop(&self, id: &str, _grace: Duration) -> Result<(), EngineError> {
        self.record("stop")?;
        let mut state = self.state();
        let container = state.containers.get_mut(id).ok_or_else(|| Self::missing(id))?;
        container.status = ContainerStatus::Exited;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.record("remove")?;
        match self.state().containers.remove(id) {
            Some(_) => Ok(()),
            None => Err(Self::missing(id)),
        }
    }

    fn inspect(&self, id: &str) -> Result<ContainerInspection, EngineError> {
        self.record("inspect")?;
        let exit_after = *self.exit_after.lock().unwrap();
        let state = self.state();
        let container = state.containers.get(id).ok_or_else(|| Self::missing(id))?;

        let mut status = container.status;
        if let (Some(started_at), Some(after)) = (container.started_at, exit_after) {
            if status == ContainerStatus::Running
                && self.now() >= started_at + chrono::Duration::from_std(after).unwrap()
            {
                status = ContainerStatus::Exited;
            }
        }
        Ok(ContainerInspection {
            status,
            started_at: container.started_at,
            exit_code: status.has_exited().then_some(1),
            port_bindings: container.port_bindings.clone(),
        })
    }

    fn list_by_label(&self, label: &str) -> Result<Vec<String>, EngineError> {
        self.record("list")?;
        let (key, value) = label.split_once('=').unwrap();
        Ok(self
            .state()
            .containers
            .iter()
            .filter(|(_, c)| c.request.labels.get(key).map(String::as_str) == Some(value))
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn host(&self) -> String {
        "localhost".to_string()
    }
}

fn list_files(root: &Path, path: &Path, files: &mut Vec<String>) {
    if path.is_dir() {
        for entry in std::fs::read_dir(path).unwrap() {
            list_files(root, &entry.unwrap().path(), files);
        }
    } else {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = if relative.as_os_str().is_empty() {
            path.file_name().unwrap()
        } else {
            relative.as_os_str()
        };
        files.push(name.to_string_lossy().replace('\\', "/"));
    }
}

/// Settings with short, fixed polling intervals
pub fn fast_settings() -> LifecycleSettings {
    LifecycleSettings {
        start_timeout: Duration::from_secs(2),
        stop_grace: Duration::from_secs(1),
        readiness_timeout: Duration::from_secs(2),
        backoff: BackoffPolicy::fixed(Duration::from_millis(10)),
        log_tail_lines: 5,
        reaper_enabled: true,
    }
}

pub fn extension(id: &str) -> PackagedExtension {
    ArchiveAssembler::new()
        .assemble(&[], &[], &[], &DescriptorFields::new(id, "1.0.0"))
        .unwrap()
}
