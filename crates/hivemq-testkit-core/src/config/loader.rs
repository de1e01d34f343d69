//! Hierarchical configuration loader with precedence
//!
//! Loads configuration from multiple sources with the following precedence (low to high):
//! 1. Embedded defaults (built into the library)
//! 2. User config (~/.hivemq-testkit/config.yaml)
//! 3. Environment variables (HIVEMQ_TESTKIT_* prefix)
//! 4. Builder calls (handled by caller)

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde_yaml_ng::Value;
use std::env;
use std::fs;
use std::str::FromStr;
use tracing::debug;

use super::types::TestkitConfig;

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/embedded/"]
#[prefix = ""]
struct EmbeddedConfigs;

const DEFAULTS_FILE: &str = "defaults.yaml";
const USER_CONFIG_FILE: &str = "config.yaml";
const ENV_PREFIX: &str = "HIVEMQ_TESTKIT_";

/// Configuration hierarchy loader
pub struct ConfigLoader {
    /// Directory holding the user config file
    config_dir: Utf8PathBuf,
}

impl ConfigLoader {
    /// Create a loader for the standard config directory
    ///
    /// `HIVEMQ_TESTKIT_CONFIG_DIR` overrides `~/.hivemq-testkit`.
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    fn get_config_dir() -> Result<Utf8PathBuf> {
        if let Ok(dir) = env::var(format!("{}CONFIG_DIR", ENV_PREFIX)) {
            return Ok(Utf8PathBuf::from(dir));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| Error::invalid_config("Could not determine home directory"))?;
        let home = Utf8PathBuf::from_path_buf(home)
            .map_err(|p| Error::invalid_config(format!("Non UTF-8 home directory: {:?}", p)))?;

        Ok(home.join(".hivemq-testkit"))
    }

    /// The directory searched for `config.yaml`
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Built-in defaults only
    pub fn defaults() -> Result<TestkitConfig> {
        let value = Self::load_embedded_value(DEFAULTS_FILE)?;
        serde_yaml_ng::from_value(value).map_err(|e| {
            Error::invalid_config(format!("Failed to parse embedded defaults: {}", e))
        })
    }

    /// Load configuration with hierarchical precedence
    pub fn load(&self) -> Result<TestkitConfig> {
        let mut value = Self::load_embedded_value(DEFAULTS_FILE)?;

        let user_path = self.config_dir.join(USER_CONFIG_FILE);
        if user_path.exists() {
            debug!("Merging user configuration from {}", user_path);
            let overlay = self.load_yaml_file(&user_path)?;
            merge_values(&mut value, overlay);
        }

        let config: TestkitConfig = serde_yaml_ng::from_value(value)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", user_path, e)))?;

        self.apply_env_overrides(config)
    }

    fn load_embedded_value(filename: &str) -> Result<Value> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        Ok(serde_yaml_ng::from_str(content)?)
    }

    fn load_yaml_file(&self, path: &Utf8Path) -> Result<Value> {
        let content = fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, mut config: TestkitConfig) -> Result<TestkitConfig> {
        if let Some(val) = env_string("IMAGE") {
            config.container.image = val;
        }
        if let Some(val) = env_string("DOCKER_BINARY") {
            config.container.docker_binary = val;
        }
        if let Some(val) = env_parsed("START_TIMEOUT_SECS")? {
            config.container.start_timeout_secs = val;
        }
        if let Some(val) = env_parsed("STOP_GRACE_SECS")? {
            config.container.stop_grace_secs = val;
        }
        if let Some(val) = env_parsed("REAPER_ENABLED")? {
            config.container.reaper_enabled = val;
        }

        if let Some(val) = env_parsed("READINESS_TIMEOUT_SECS")? {
            config.readiness.timeout_secs = val;
        }

        if let Some(val) = env_string("MAVEN_LOCAL_REPOSITORY") {
            config.maven.local_repository = val;
        }
        if let Some(val) = env_string("MAVEN_REMOTE_REPOSITORIES") {
            config.maven.remote_repositories = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(val) = env_parsed("HTTP_TIMEOUT_SECS")? {
            config.maven.http_timeout_secs = val;
        }

        Ok(config)
    }
}

impl TestkitConfig {
    /// Load from the standard locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new()?.load()
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, key))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            Error::invalid_config(format!(
                "{}{} has an invalid value: {}",
                ENV_PREFIX, key, raw
            ))
        }),
        None => Ok(None),
    }
}

/// Deep-merge `overlay` into `base`; mappings merge key by key, anything else replaces
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}
