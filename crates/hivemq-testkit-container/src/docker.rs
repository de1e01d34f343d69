//! Docker engine driven through the `docker` CLI

use chrono::{DateTime, SecondsFormat, Utc};
use hivemq_testkit_core::ContainerSettings;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::{
    ContainerEngine, ContainerInspection, ContainerStatus, CreateRequest, ExecOutput, LogLine,
};
use crate::error::EngineError;

/// [`ContainerEngine`] backed by the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl DockerCli {
    /// Locate `binary` (a name on `PATH` or a path)
    pub fn new(binary: &str) -> Result<Self, EngineError> {
        let binary = which::which(binary).map_err(|e| EngineError::Unavailable {
            message: format!("{} not found: {}", binary, e),
        })?;
        Ok(Self { binary })
    }

    pub fn from_settings(settings: &ContainerSettings) -> Result<Self, EngineError> {
        Self::new(&settings.docker_binary)
    }

    /// Whether the daemon answers
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    /// Run a docker command, classifying stderr on failure
    fn run(&self, operation: &str, args: &[&str]) -> Result<String, EngineError> {
        debug!("docker {}", args.join(" "));
        let output = self.command().args(args).output().map_err(spawn_error)?;
        check(operation, args, output)
    }
}

fn spawn_error(e: std::io::Error) -> EngineError {
    EngineError::Unavailable {
        message: format!("failed to run docker: {}", e),
    }
}

fn check(operation: &str, args: &[&str], output: Output) -> Result<String, EngineError> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(classify(operation, args.last().copied().unwrap_or_default(), &stderr))
}

/// Result of `docker cp -`; docker's own failure wins over a broken stdin pipe
fn copy_outcome(id: &str, written: io::Result<()>, output: Output) -> Result<(), EngineError> {
    check("copy", &["cp", id], output)?;
    written.map_err(|e| {
        warn!("docker cp into {} exited cleanly after a failed write: {}", short(id), e);
        EngineError::Io(e)
    })
}

/// Map docker CLI stderr to an engine error
fn classify(operation: &str, subject: &str, stderr: &str) -> EngineError {
    let lower = stderr.to_lowercase();

    if lower.contains("no such container") {
        EngineError::NoSuchContainer {
            id: subject.to_string(),
        }
    } else if lower.contains("pull access denied")
        || lower.contains("manifest unknown")
        || lower.contains("no such image")
        || lower.contains("repository does not exist")
    {
        EngineError::ImagePull {
            image: subject.to_string(),
            message: stderr.to_string(),
        }
    } else if lower.contains("port is already allocated") || lower.contains("address already in use")
    {
        EngineError::PortConflict {
            message: stderr.to_string(),
        }
    } else if lower.contains("cannot connect to the docker daemon") {
        EngineError::Unavailable {
            message: stderr.to_string(),
        }
    } else {
        EngineError::rejected(operation, stderr)
    }
}

impl ContainerEngine for DockerCli {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn create(&self, request: &CreateRequest) -> Result<String, EngineError> {
        let mut args: Vec<String> = vec!["create".into()];
        for port in &request.exposed_ports {
            args.push("-p".into());
            args.push(port.to_string());
        }
        for (key, value) in &request.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &request.labels {
            args.push("--label".into());
            args.push(format!("{}={}", key, value));
        }
        if let Some(name) = &request.name {
            args.push("--name".into());
            args.push(name.clone());
        }
        args.push(request.image.clone());

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.run("create", &args)?.trim().to_string();
        if id.is_empty() {
            return Err(EngineError::parse("docker create printed no container id"));
        }
        info!("Created container {} from {}", short(&id), request.image);
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<(), EngineError> {
        self.run("start", &["start", id])?;
        info!("Started container {}", short(id));
        Ok(())
    }

    fn copy_into(
        &self,
        id: &str,
        host_path: &Path,
        container_path: &str,
    ) -> Result<(), EngineError> {
        let archive = archive_for(host_path, container_path)?;

        let mut child = self
            .command()
            .args(["cp", "-", &format!("{}:/", id)])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        // stdin is closed at the end of the match so docker sees EOF
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&archive),
            None => Ok(()),
        };
        let output = child.wait_with_output()?;
        copy_outcome(id, written, output)?;

        debug!(
            "Copied {} to {}:{}",
            host_path.display(),
            short(id),
            container_path
        );
        Ok(())
    }

    fn exec(&self, id: &str, argv: &[&str]) -> Result<ExecOutput, EngineError> {
        // root, so that files copied in by the daemon can be changed
        let mut args = vec!["exec", "--user", "0", id];
        args.extend_from_slice(argv);

        let output = self.command().args(&args).output().map_err(spawn_error)?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        match output.status.code() {
            // 125-127 are docker's own failures, not the command's
            Some(code) if !(125..=127).contains(&code) || output.status.success() => {
                Ok(ExecOutput {
                    exit_code: i64::from(code),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr,
                })
            }
            _ => Err(classify("exec", id, stderr.trim())),
        }
    }

    fn logs(&self, id: &str, since: Option<DateTime<Utc>>) -> Result<Vec<LogLine>, EngineError> {
        let since = since.map(|t| t.to_rfc3339_opts(SecondsFormat::Nanos, true));
        let mut args = vec!["logs", "--timestamps"];
        if let Some(since) = &since {
            args.push("--since");
            args.push(since);
        }
        args.push(id);

        let output = self.command().args(&args).output().map_err(spawn_error)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify("logs", id, stderr.trim()));
        }

        // the broker writes to both streams; merge them by timestamp
        let mut lines = parse_log_lines(&String::from_utf8_lossy(&output.stdout));
        lines.extend(parse_log_lines(&String::from_utf8_lossy(&output.stderr)));
        lines.sort_by_key(|line| line.timestamp);
        Ok(lines)
    }

    fn stop(&self, id: &str, grace: Duration) -> Result<(), EngineError> {
        let secs = grace.as_secs().to_string();
        self.run("stop", &["stop", "-t", &secs, id])?;
        info!("Stopped container {}", short(id));
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.run("remove", &["rm", "-f", "-v", id])?;
        debug!("Removed container {}", short(id));
        Ok(())
    }

    fn inspect(&self, id: &str) -> Result<ContainerInspection, EngineError> {
        let stdout = self.run("inspect", &["inspect", id])?;
        parse_inspection(&stdout)
    }

    fn list_by_label(&self, label: &str) -> Result<Vec<String>, EngineError> {
        let filter = format!("label={}", label);
        let stdout = self.run("list", &["ps", "-a", "-q", "--no-trunc", "--filter", &filter])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn host(&self) -> String {
        host_from_docker_host(std::env::var("DOCKER_HOST").ok().as_deref())
    }
}

fn short(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Tar stream placing `host_path` at `container_path` relative to `/`
fn archive_for(host_path: &Path, container_path: &str) -> Result<Vec<u8>, EngineError> {
    let target = container_path.trim_start_matches('/').trim_end_matches('/');
    if target.is_empty() {
        return Err(EngineError::rejected(
            "copy",
            "refusing to copy over the container root",
        ));
    }

    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(true);
    if host_path.is_dir() {
        builder.append_dir_all(target, host_path)?;
    } else {
        builder.append_path_with_name(host_path, target)?;
    }
    Ok(builder.into_inner()?)
}

fn parse_log_lines(output: &str) -> Vec<LogLine> {
    output
        .lines()
        .filter_map(|line| {
            let (stamp, text) = line.split_once(' ').unwrap_or((line, ""));
            let timestamp = DateTime::parse_from_rfc3339(stamp).ok()?.with_timezone(&Utc);
            Some(LogLine::new(timestamp, text))
        })
        .collect()
}

fn parse_inspection(json: &str) -> Result<ContainerInspection, EngineError> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| EngineError::parse(format!("inspect: {}", e)))?;
    let container = value
        .as_array()
        .and_then(|a| a.first())
        .ok_or_else(|| EngineError::parse("inspect returned no containers"))?;

    let state = &container["State"];
    let status = ContainerStatus::parse(state["Status"].as_str().unwrap_or_default());
    let started_at = state["StartedAt"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        // never-started containers report year 1
        .filter(|t| t.timestamp() > 0);
    let exit_code = state["ExitCode"].as_i64();

    let mut port_bindings = BTreeMap::new();
    if let Some(ports) = container["NetworkSettings"]["Ports"].as_object() {
        for (spec, bindings) in ports {
            let Some(container_port) = spec.split('/').next().and_then(|p| p.parse::<u16>().ok())
            else {
                continue;
            };
            let host_port = bindings
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|b| b["HostPort"].as_str())
                .find_map(|p| p.parse::<u16>().ok());
            if let Some(host_port) = host_port {
                port_bindings.insert(container_port, host_port);
            }
        }
    }

    Ok(ContainerInspection {
        status,
        started_at,
        exit_code,
        port_bindings,
    })
}

/// `tcp://host:port` -> `host`; anything else (unix sockets, unset) -> `localhost`
fn host_from_docker_host(docker_host: Option<&str>) -> String {
    docker_host
        .and_then(|h| url::Url::parse(h).ok())
        .filter(|u| matches!(u.scheme(), "tcp" | "http" | "https"))
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_else(|| "localhost".to_string())
}
