//! Artifact sources: the local repository plus remote Maven repositories

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use hivemq_testkit_core::MavenSettings;
use sha1::{Digest, Sha1};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

use crate::coordinate::Coordinate;
use crate::error::ResolutionError;

/// Capability to produce a local file for `coordinate` with the given extension
/// (`pom` or `jar`)
///
/// Implementations must not retry internally; callers decide whether to retry.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, coordinate: &Coordinate, extension: &str)
        -> Result<PathBuf, ResolutionError>;
}

/// Local repository with remote fallbacks, in Maven's standard layout
pub struct MavenRepositories {
    local: PathBuf,
    remotes: Vec<Url>,
    client: reqwest::Client,
}

enum Download {
    Stored,
    Missing,
}

impl MavenRepositories {
    /// Create from a local repository path and remote base URLs
    pub fn new(
        local: impl Into<PathBuf>,
        remotes: &[String],
        timeout: std::time::Duration,
    ) -> Result<Self, ResolutionError> {
        let remotes = remotes
            .iter()
            .map(|raw| parse_repository_url(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("hivemq-testkit/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ResolutionError::InvalidCoordinate {
                input: format!("HTTP client setup failed: {}", e),
            })?;

        Ok(Self {
            local: local.into(),
            remotes,
            client,
        })
    }

    /// Create from configuration
    pub fn from_settings(settings: &MavenSettings) -> Result<Self, ResolutionError> {
        Self::new(
            settings.local_repository_path(),
            &settings.remote_repositories,
            settings.http_timeout(),
        )
    }

    pub fn local_repository(&self) -> &Path {
        &self.local
    }

    pub fn remotes(&self) -> &[Url] {
        &self.remotes
    }

    async fn download(
        &self,
        coordinate: &Coordinate,
        url: &Url,
        target: &Path,
    ) -> Result<Download, ResolutionError> {
        debug!("Downloading {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ResolutionError::network(coordinate, e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Download::Missing);
        }
        if !response.status().is_success() {
            return Err(ResolutionError::network(
                coordinate,
                format!("{} returned HTTP {}", url, response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ResolutionError::network(coordinate, e.to_string()))?;

        self.verify_sha1(coordinate, url, &bytes).await?;

        let target = target.to_path_buf();
        let coordinate_for_store = coordinate.clone();
        tokio::task::spawn_blocking(move || store_atomically(&target, &bytes))
            .await
            .map_err(|e| ResolutionError::cache(&coordinate_for_store, e))?
            .map_err(|e| ResolutionError::cache(coordinate, e))?;

        Ok(Download::Stored)
    }

    /// Compare against the published `.sha1` sidecar; a missing sidecar only warns
    async fn verify_sha1(
        &self,
        coordinate: &Coordinate,
        url: &Url,
        bytes: &[u8],
    ) -> Result<(), ResolutionError> {
        let actual = format!("{:x}", Sha1::digest(bytes));

        let sidecar = Url::parse(&format!("{}.sha1", url))
            .map_err(|e| ResolutionError::network(coordinate, e.to_string()))?;
        let response = self
            .client
            .get(sidecar)
            .send()
            .await
            .map_err(|e| ResolutionError::network(coordinate, e.to_string()))?;

        if !response.status().is_success() {
            warn!(
                "No SHA-1 checksum published for {} (HTTP {}); skipping verification",
                url,
                response.status()
            );
            return Ok(());
        }

        let body = response
            .text()
            .await
            .map_err(|e| ResolutionError::network(coordinate, e.to_string()))?;
        let expected = body
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();

        if expected != actual {
            return Err(ResolutionError::ChecksumMismatch {
                coordinate: coordinate.clone(),
                expected,
                actual,
            });
        }

        debug!("{} passed SHA-1 verification ({})", url, actual);
        Ok(())
    }
}

#[async_trait]
impl ArtifactSource for MavenRepositories {
    async fn fetch(
        &self,
        coordinate: &Coordinate,
        extension: &str,
    ) -> Result<PathBuf, ResolutionError> {
        let relative = coordinate.repository_path(extension);
        let local = self.local.join(&relative);

        if local.is_file() {
            debug!("Using cached {}", local.display());
            return Ok(local);
        }

        let mut network_error = None;
        for remote in &self.remotes {
            let url = remote
                .join(&relative)
                .map_err(|e| ResolutionError::network(coordinate, e.to_string()))?;

            match self.download(coordinate, &url, &local).await {
                Ok(Download::Stored) => {
                    info!("Downloaded {} from {}", coordinate, remote);
                    return Ok(local);
                }
                Ok(Download::Missing) => continue,
                Err(e @ ResolutionError::NetworkFailure { .. }) => {
                    warn!("{}", e);
                    network_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(network_error.unwrap_or_else(|| ResolutionError::not_found(coordinate)))
    }
}

/// Repository base URLs must end in `/` so that `join` appends instead of replacing
fn parse_repository_url(raw: &str) -> Result<Url, ResolutionError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized).map_err(|e| ResolutionError::InvalidCoordinate {
        input: format!("repository URL {}: {}", raw, e),
    })
}

/// Write `bytes` to `target` through a temp file, serialized across processes by a lock file
fn store_atomically(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| std::io::Error::other("artifact path has no parent directory"))?;
    fs::create_dir_all(parent)?;

    let lock_path = target.with_file_name(format!(
        "{}.lock",
        target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;

    // Released when `lock` is dropped
    lock.lock_exclusive()?;

    if !target.is_file() {
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(target).map_err(|e| e.error)?;
    }

    // Once the target exists no later holder writes, so the lock file can go
    if let Err(e) = fs::remove_file(&lock_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Leaving lock file {}: {}", lock_path.display(), e);
        }
    }
    Ok(())
}
