//! Shared test utilities for hivemq-testkit integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use hivemq_testkit::{extension_started_line, extension_stopped_line, ExtensionDescriptor};
use hivemq_testkit_container::{
    ContainerEngine, ContainerInspection, ContainerStatus, CreateRequest, EngineError, ExecOutput,
    LifecycleSettings, LogLine, EXTENSIONS_DIR,
};
use hivemq_testkit_core::BackoffPolicy;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// An extension the simulated broker knows about
#[derive(Debug, Clone)]
struct KnownExtension {
    name: String,
    version: String,
    disabled: bool,
}

struct Broker {
    request: CreateRequest,
    status: ContainerStatus,
    started_at: Option<DateTime<Utc>>,
    logs: Vec<LogLine>,
    extensions: BTreeMap<String, KnownExtension>,
    ports: BTreeMap<u16, u16>,
}

impl Broker {
    fn log(&mut self, at: DateTime<Utc>, text: String) {
        self.logs.push(LogLine::new(at, text));
        self.logs.sort_by_key(|l| l.timestamp);
    }
}

#[derive(Default)]
struct State {
    next_id: u16,
    brokers: BTreeMap<String, Broker>,
    copied_paths: Vec<String>,
    execs: Vec<Vec<String>>,
}

/// Container engine that behaves like a HiveMQ broker image
///
/// Extensions copied into the extensions folder are "loaded" the way the broker
/// does it: announced at startup, or right away when copied into a running broker.
/// `touch`/`rm` of a `DISABLED` marker stop and start them again.
pub struct FakeBroker {
    state: Mutex<State>,
    startup: Duration,
    prints_started: bool,
    clock_behind: Duration,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            startup: Duration::from_millis(20),
            prints_started: true,
            clock_behind: Duration::ZERO,
        }
    }

    /// A broker that never finishes starting
    pub fn hanging() -> Self {
        Self {
            prints_started: false,
            ..Self::new()
        }
    }

    /// A broker whose daemon clock runs `behind` the host clock
    pub fn with_clock_behind(behind: Duration) -> Self {
        Self {
            clock_behind: behind,
            ..Self::new()
        }
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::from_std(self.clock_behind).unwrap()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn copied_paths(&self) -> Vec<String> {
        self.state().copied_paths.clone()
    }

    pub fn execs(&self) -> Vec<Vec<String>> {
        self.state().execs.clone()
    }

    pub fn container_count(&self) -> usize {
        self.state().brokers.len()
    }

    pub fn env(&self) -> BTreeMap<String, String> {
        self.state()
            .brokers
            .values()
            .next()
            .map(|b| b.request.env.clone())
            .unwrap_or_default()
    }

    fn missing(id: &str) -> EngineError {
        EngineError::NoSuchContainer { id: id.to_string() }
    }
}

fn extension_id(container_path: &str) -> Option<&str> {
    let rest = container_path.strip_prefix(EXTENSIONS_DIR)?.strip_prefix('/')?;
    rest.split('/').next().filter(|id| !id.is_empty())
}

fn marker_owner(path: &str) -> Option<&str> {
    let dir = path.strip_suffix("/DISABLED")?;
    extension_id(dir)
}

impl ContainerEngine for FakeBroker {
    fn name(&self) -> &'static str {
        "fake-broker"
    }

    fn create(&self, request: &CreateRequest) -> Result<String, EngineError> {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("broker-{}", state.next_id);
        let ports = request
            .exposed_ports
            .iter()
            .enumerate()
            .map(|(i, port)| (*port, 32_000 + state.next_id * 100 + i as u16))
            .collect();
        state.brokers.insert(
            id.clone(),
            Broker {
                request: request.clone(),
                status: ContainerStatus::Created,
                started_at: None,
                logs: Vec::new(),
                extensions: BTreeMap::new(),
                ports,
            },
        );
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        let broker = state.brokers.get_mut(id).ok_or_else(|| Self::missing(id))?;
        let started_at = self.now();
        broker.status = ContainerStatus::Running;
        broker.started_at = Some(started_at);

        broker.log(started_at, "Starting HiveMQ Community Edition Server".to_string());
        let loaded: Vec<KnownExtension> = broker
            .extensions
            .values()
            .filter(|e| !e.disabled)
            .cloned()
            .collect();
        let ready_at = started_at + chrono::Duration::from_std(self.startup).unwrap();
        for extension in loaded {
            broker.log(ready_at, extension_started_line(&extension.name, &extension.version));
        }
        if self.prints_started {
            broker.log(ready_at, "Started HiveMQ in 20ms".to_string());
        }
        Ok(())
    }

    fn copy_into(&self, id: &str, host_path: &Path, container_path: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.copied_paths.push(container_path.to_string());
        let broker = state.brokers.get_mut(id).ok_or_else(|| Self::missing(id))?;

        let is_extension_root = extension_id(container_path)
            .map(|ext| container_path == format!("{}/{}", EXTENSIONS_DIR, ext))
            .unwrap_or(false);
        if !is_extension_root || !host_path.is_dir() {
            return Ok(());
        }
        let Ok(descriptor) = ExtensionDescriptor::read_from_dir(host_path) else {
            return Ok(());
        };
        let extension = KnownExtension {
            name: descriptor.name().to_string(),
            version: descriptor.version().to_string(),
            disabled: host_path.join("DISABLED").exists(),
        };
        if broker.status == ContainerStatus::Running && !extension.disabled {
            broker.log(self.now(), extension_started_line(&extension.name, &extension.version));
        }
        broker.extensions.insert(descriptor.id().to_string(), extension);
        Ok(())
    }

    fn exec(&self, id: &str, argv: &[&str]) -> Result<ExecOutput, EngineError> {
        let mut state = self.state();
        state.execs.push(argv.iter().map(|a| a.to_string()).collect());
        let broker = state.brokers.get_mut(id).ok_or_else(|| Self::missing(id))?;

        let (disable, path) = match argv {
            ["touch", path] => (true, *path),
            ["rm", "-f", path] => (false, *path),
            _ => return Ok(ExecOutput::default()),
        };
        let Some(ext_id) = marker_owner(path) else {
            return Ok(ExecOutput::default());
        };
        let Some(extension) = broker.extensions.get_mut(ext_id) else {
            return Ok(ExecOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("{}: No such file or directory", path),
            });
        };
        if extension.disabled != disable {
            extension.disabled = disable;
            let line = if disable {
                extension_stopped_line(&extension.name, &extension.version)
            } else {
                extension_started_line(&extension.name, &extension.version)
            };
            broker.log(self.now(), line);
        }
        Ok(ExecOutput::default())
    }

    fn logs(&self, id: &str, _since: Option<DateTime<Utc>>) -> Result<Vec<LogLine>, EngineError> {
        let now = self.now();
        let state = self.state();
        let broker = state.brokers.get(id).ok_or_else(|| Self::missing(id))?;
        Ok(broker.logs.iter().filter(|l| l.timestamp <= now).cloned().collect())
    }

    fn stop(&self, id: &str, _grace: Duration) -> Result<(), EngineError> {
        let mut state = self.state();
        let broker = state.brokers.get_mut(id).ok_or_else(|| Self::missing(id))?;
        broker.status = ContainerStatus::Exited;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.state()
            .brokers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Self::missing(id))
    }

    fn inspect(&self, id: &str) -> Result<ContainerInspection, EngineError> {
        let state = self.state();
        let broker = state.brokers.get(id).ok_or_else(|| Self::missing(id))?;
        Ok(ContainerInspection {
            status: broker.status,
            started_at: broker.started_at,
            exit_code: None,
            port_bindings: broker.ports.clone(),
        })
    }

    fn list_by_label(&self, _label: &str) -> Result<Vec<String>, EngineError> {
        Ok(self.state().brokers.keys().cloned().collect())
    }

    fn host(&self) -> String {
        "127.0.0.1".to_string()
    }
}

pub fn fast_settings() -> LifecycleSettings {
    LifecycleSettings {
        start_timeout: Duration::from_secs(2),
        stop_grace: Duration::from_secs(1),
        readiness_timeout: Duration::from_secs(5),
        backoff: BackoffPolicy::fixed(Duration::from_millis(10)),
        log_tail_lines: 10,
        reaper_enabled: false,
    }
}
