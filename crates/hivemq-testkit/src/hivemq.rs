//! HiveMQ broker fixture
//!
//! [`HiveMqContainer`] collects everything the broker container needs before it
//! starts. [`HiveMqContainer::start`] consumes it and returns a [`RunningHiveMq`]
//! once the broker and every preloaded, enabled extension reported startup.

use hivemq_testkit_container::{
    CancelToken, ContainerController, ContainerEngine, ContainerSpec, DockerCli, EngineError,
    FileCopy, HostPort, LifecycleSettings, LifecycleState, LogLine, LogPattern, ReadinessProbe,
    EXTENSIONS_DIR,
};
use hivemq_testkit_core::TestkitConfig;
use hivemq_testkit_extension::{
    ExtensionDescriptor, PackagedExtension, DESCRIPTOR_FILE_NAME, DISABLED_MARKER,
};
use std::fmt;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_IMAGE: &str = "hivemq/hivemq-ce:latest";
pub const MQTT_PORT: u16 = 1883;
pub const CONTROL_CENTER_PORT: u16 = 8080;
pub const DEBUG_PORT: u16 = 9000;

pub const HIVEMQ_HOME: &str = "/opt/hivemq";
const LICENSE_DIR: &str = "/opt/hivemq/license";
const CONFIG_FILE: &str = "/opt/hivemq/conf/config.xml";

/// Broker log line announcing a completed startup
pub const STARTED_LINE: &str = "Started HiveMQ in";

/// Broker log level (`HIVEMQ_LOG_LEVEL`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    All,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Self::All => "ALL",
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Off => "OFF",
        };
        write!(f, "{}", level)
    }
}

/// Log line the broker prints once an extension started
pub fn extension_started_line(name: &str, version: &str) -> String {
    format!("Extension \"{}\" version {} started successfully.", name, version)
}

/// Log line the broker prints once an extension stopped
pub fn extension_stopped_line(name: &str, version: &str) -> String {
    format!("Extension \"{}\" version {} stopped successfully.", name, version)
}

/// Builder for a broker container
pub struct HiveMqContainer {
    spec: ContainerSpec,
    settings: LifecycleSettings,
    docker_binary: String,
    engine: Option<Arc<dyn ContainerEngine>>,
    startup_timeout: Duration,
    cancel: CancelToken,
    /// Started lines of extensions added as plain directories
    directory_extensions: Vec<String>,
}

impl HiveMqContainer {
    pub fn new(image: impl Into<String>) -> Self {
        Self::build(image.into(), LifecycleSettings::default(), "docker".to_string())
    }

    /// Image, timeouts and docker binary from configuration
    pub fn from_config(config: &TestkitConfig) -> Self {
        Self::build(
            config.container.image.clone(),
            LifecycleSettings::from_config(config),
            config.container.docker_binary.clone(),
        )
    }

    fn build(image: String, settings: LifecycleSettings, docker_binary: String) -> Self {
        let mut spec = ContainerSpec::new(image);
        spec.expose(MQTT_PORT);
        Self {
            spec,
            startup_timeout: settings.readiness_timeout,
            settings,
            docker_binary,
            engine: None,
            cancel: CancelToken::new(),
            directory_extensions: Vec::new(),
        }
    }

    /// Replace timeouts and polling intervals; the startup timeout is left as is
    pub fn with_lifecycle_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Drive the container through `engine` instead of the docker CLI
    pub fn with_engine(mut self, engine: Arc<dyn ContainerEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Preload a packaged extension
    pub fn with_extension(mut self, extension: PackagedExtension) -> Self {
        self.spec.add_extension(extension);
        self
    }

    /// Preload an extension directory; its name becomes the extension id
    ///
    /// If the directory holds a readable descriptor and no `DISABLED` marker,
    /// startup also waits for the extension's started line.
    pub fn with_extension_dir(mut self, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::invalid_file(dir, "extension must be an existing directory"));
        }
        let Some(id) = dir.file_name().and_then(|n| n.to_str()) else {
            return Err(Error::invalid_file(dir, "extension directory has no usable name"));
        };

        if dir.join(DESCRIPTOR_FILE_NAME).is_file() && !dir.join(DISABLED_MARKER).exists() {
            let descriptor = ExtensionDescriptor::read_from_dir(dir)?;
            self.directory_extensions.push(extension_started_line(
                descriptor.name(),
                descriptor.version(),
            ));
        } else {
            debug!("Not waiting for extension directory {}", dir.display());
        }

        self.spec
            .files
            .push(FileCopy::new(dir, format!("{}/{}", EXTENSIONS_DIR, id)));
        Ok(self)
    }

    /// Install a license file; it must exist and end in `.lic`
    pub fn with_license(mut self, license: impl AsRef<Path>) -> Result<Self> {
        let license = license.as_ref();
        if !license.is_file() {
            return Err(Error::invalid_file(license, "license file does not exist"));
        }
        let Some(name) = license.file_name().and_then(|n| n.to_str()) else {
            return Err(Error::invalid_file(license, "license file has no usable name"));
        };
        if !name.ends_with(".lic") {
            return Err(Error::invalid_file(license, "license file must end in .lic"));
        }

        self.spec
            .files
            .push(FileCopy::new(license, format!("{}/{}", LICENSE_DIR, name)));
        Ok(self)
    }

    /// Replace the broker's `config.xml`
    pub fn with_hivemq_config(mut self, config: impl AsRef<Path>) -> Result<Self> {
        let config = config.as_ref();
        if !config.is_file() {
            return Err(Error::invalid_file(config, "broker config file does not exist"));
        }
        self.spec.files.push(FileCopy::new(config, CONFIG_FILE));
        Ok(self)
    }

    /// Copy a file or directory to `/opt/hivemq/<path_in_home>`
    pub fn with_file_in_home_folder(
        mut self,
        file: impl AsRef<Path>,
        path_in_home: &str,
    ) -> Result<Self> {
        let file = existing(file.as_ref())?;
        let target = home_relative(file, path_in_home)?;
        self.spec
            .files
            .push(FileCopy::new(file, format!("{}/{}", HIVEMQ_HOME, target)));
        Ok(self)
    }

    /// Copy a file or directory to `/opt/hivemq/extensions/<extension_id>/<path_in_extension>`
    pub fn with_file_in_extension_home_folder(
        mut self,
        file: impl AsRef<Path>,
        extension_id: &str,
        path_in_extension: &str,
    ) -> Result<Self> {
        let file = existing(file.as_ref())?;
        let id = home_relative(file, extension_id)?;
        if id.contains('/') {
            return Err(Error::invalid_file(file, "extension id must be a single path segment"));
        }
        let target = home_relative(file, path_in_extension)?;
        self.spec.files.push(FileCopy::new(
            file,
            format!("{}/{}/{}", EXTENSIONS_DIR, id, target),
        ));
        Ok(self)
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.spec
            .env
            .insert("HIVEMQ_LOG_LEVEL".to_string(), level.to_string());
        self
    }

    /// Expose the control center on 8080
    pub fn with_control_center(mut self) -> Self {
        self.spec.expose(CONTROL_CENTER_PORT);
        self
    }

    /// Expose a JDWP agent on 9000
    pub fn with_debugging(mut self) -> Self {
        self.spec.expose(DEBUG_PORT);
        self.spec.env.insert(
            "JAVA_OPTS".to_string(),
            format!(
                "-agentlib:jdwp=transport=dt_socket,address=*:{},server=y,suspend=n",
                DEBUG_PORT
            ),
        );
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.labels.insert(key.into(), value.into());
        self
    }

    /// Bound on broker startup, including preloaded extensions
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Token that aborts `start` from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// What `start` waits for
    pub fn readiness_probe(&self) -> ReadinessProbe {
        let mut probe = ReadinessProbe::new().log(LogPattern::literal(STARTED_LINE));
        for extension in &self.spec.extensions {
            if extension.is_disabled_on_startup() {
                continue;
            }
            let descriptor = extension.descriptor();
            probe = probe.log(LogPattern::literal(extension_started_line(
                descriptor.name(),
                descriptor.version(),
            )));
        }
        for line in &self.directory_extensions {
            probe = probe.log(LogPattern::literal(line.as_str()));
        }
        probe
    }

    /// Start the broker and wait until it is ready
    ///
    /// On failure the container is released before the error is returned.
    pub fn start(self) -> Result<RunningHiveMq> {
        let probe = self.readiness_probe();
        let engine: Arc<dyn ContainerEngine> = match self.engine {
            Some(engine) => engine,
            None => Arc::new(DockerCli::new(&self.docker_binary)?),
        };

        let mut controller = ContainerController::new(engine, self.settings, self.spec)
            .with_cancel_token(self.cancel);
        controller.start()?;
        controller.wait_until_ready(&probe, self.startup_timeout)?;

        if let Some(id) = controller.container_id() {
            info!("HiveMQ ready in container {}", id);
        }
        Ok(RunningHiveMq { controller })
    }
}

fn existing(file: &Path) -> Result<&Path> {
    if file.exists() {
        Ok(file)
    } else {
        Err(Error::invalid_file(file, "file does not exist"))
    }
}

/// Relative, non-empty path that stays below its base
fn home_relative(file: &Path, path: &str) -> Result<String> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(Error::invalid_file(file, "container path must not be empty"));
    }
    if Path::new(trimmed)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(Error::invalid_file(
            file,
            format!("container path '{}' must stay inside its folder", path),
        ));
    }
    Ok(trimmed.to_string())
}

/// A ready broker
pub struct RunningHiveMq {
    controller: ContainerController,
}

impl RunningHiveMq {
    pub fn controller(&self) -> &ContainerController {
        &self.controller
    }

    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    pub fn container_id(&self) -> Option<&str> {
        self.controller.container_id()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.controller.cancel_token()
    }

    pub fn endpoint_for(&self, container_port: u16) -> Result<HostPort> {
        Ok(self.controller.endpoint_for(container_port)?)
    }

    pub fn mqtt_endpoint(&self) -> Result<HostPort> {
        self.endpoint_for(MQTT_PORT)
    }

    pub fn mqtt_port(&self) -> Result<u16> {
        Ok(self.mqtt_endpoint()?.port)
    }

    pub fn control_center_url(&self) -> Result<String> {
        Ok(format!("http://{}", self.endpoint_for(CONTROL_CENTER_PORT)?))
    }

    /// Broker output since start
    pub fn logs(&self) -> Result<Vec<LogLine>> {
        Ok(self.controller.logs()?)
    }

    /// Copy an extension into the running broker and wait for it to start
    ///
    /// An extension packaged as disabled is only copied.
    pub fn deploy_extension(
        &mut self,
        extension: PackagedExtension,
        timeout: Duration,
    ) -> Result<()> {
        let since = self.controller.log_cursor()?;
        let started = (!extension.is_disabled_on_startup()).then(|| {
            let descriptor = extension.descriptor();
            extension_started_line(descriptor.name(), descriptor.version())
        });

        self.controller.inject_extension(extension)?;
        if let Some(line) = started {
            self.controller
                .wait_for_log(&LogPattern::literal(line), since, timeout)?;
        }
        Ok(())
    }

    /// Create the extension's `DISABLED` marker and wait for the broker to stop it
    pub fn disable_extension(
        &mut self,
        descriptor: &ExtensionDescriptor,
        timeout: Duration,
    ) -> Result<()> {
        let since = self.controller.log_cursor()?;
        self.exec_checked(&["touch", &marker_path(descriptor)])?;
        self.controller.wait_for_log(
            &LogPattern::literal(extension_stopped_line(descriptor.name(), descriptor.version())),
            since,
            timeout,
        )?;
        info!("Disabled extension {}", descriptor.id());
        Ok(())
    }

    /// Remove the extension's `DISABLED` marker and wait for the broker to start it
    pub fn enable_extension(
        &mut self,
        descriptor: &ExtensionDescriptor,
        timeout: Duration,
    ) -> Result<()> {
        let since = self.controller.log_cursor()?;
        self.exec_checked(&["rm", "-f", &marker_path(descriptor)])?;
        self.controller.wait_for_log(
            &LogPattern::literal(extension_started_line(descriptor.name(), descriptor.version())),
            since,
            timeout,
        )?;
        info!("Enabled extension {}", descriptor.id());
        Ok(())
    }

    fn exec_checked(&mut self, argv: &[&str]) -> Result<()> {
        let output = self.controller.exec(argv)?;
        if !output.success() {
            return Err(EngineError::rejected(
                argv.join(" "),
                format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
            )
            .into());
        }
        Ok(())
    }

    /// Stop and remove the container; idempotent
    pub fn stop(&mut self) -> Result<()> {
        Ok(self.controller.stop()?)
    }
}

fn marker_path(descriptor: &ExtensionDescriptor) -> String {
    format!("{}/{}/{}", EXTENSIONS_DIR, descriptor.id(), DISABLED_MARKER)
}
