//! Shared fixtures for resolver integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use hivemq_testkit_resolver::{ArtifactSource, Coordinate, ResolutionError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Artifact source serving POMs and jars from memory, materialized into a temp repository
pub struct InMemorySource {
    root: TempDir,
    files: Mutex<HashMap<(Coordinate, String), Vec<u8>>>,
    fetches: Mutex<HashMap<(Coordinate, String), usize>>,
    total: AtomicUsize,
    delay: Duration,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().expect("temp repository"),
            files: Mutex::new(HashMap::new()),
            fetches: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Slow every fetch down, to widen race windows in concurrency tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Publish a jar artifact whose POM declares `dependencies` (`g:a:v` or `g:a:v:scope`)
    pub fn publish(&self, coordinate: &str, dependencies: &[&str]) -> Coordinate {
        let coordinate = Coordinate::parse(coordinate).expect("coordinate");
        let deps: String = dependencies.iter().map(|d| dependency_xml(d, &[])).collect();
        self.publish_pom(&coordinate, &pom_xml(&coordinate, "jar", &deps));
        self.publish_jar(&coordinate);
        coordinate
    }

    pub fn publish_pom(&self, coordinate: &Coordinate, xml: &str) {
        self.files.lock().unwrap().insert(
            (coordinate.pom_coordinate(), "pom".to_string()),
            xml.as_bytes().to_vec(),
        );
    }

    pub fn publish_jar(&self, coordinate: &Coordinate) {
        self.files.lock().unwrap().insert(
            (coordinate.clone(), "jar".to_string()),
            format!("jar:{}", coordinate).into_bytes(),
        );
    }

    pub fn fetch_count(&self, coordinate: &Coordinate, extension: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(&(coordinate.clone(), extension.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactSource for InMemorySource {
    async fn fetch(
        &self,
        coordinate: &Coordinate,
        extension: &str,
    ) -> Result<PathBuf, ResolutionError> {
        let key = (coordinate.clone(), extension.to_string());
        *self.fetches.lock().unwrap().entry(key.clone()).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let bytes = self
            .files
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| ResolutionError::not_found(coordinate))?;

        let path = self.root.path().join(coordinate.repository_path(extension));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        Ok(path)
    }
}

/// Render a `<dependency>` element from `g:a:v[:scope]`
pub fn dependency_xml(spec: &str, exclusions: &[&str]) -> String {
    let parts: Vec<&str> = spec.split(':').collect();
    let scope = parts
        .get(3)
        .map(|s| format!("<scope>{}</scope>", s))
        .unwrap_or_default();
    let exclusions: String = exclusions
        .iter()
        .map(|e| {
            let (g, a) = e.split_once(':').unwrap();
            format!(
                "<exclusion><groupId>{}</groupId><artifactId>{}</artifactId></exclusion>",
                g, a
            )
        })
        .collect();
    let exclusions = if exclusions.is_empty() {
        String::new()
    } else {
        format!("<exclusions>{}</exclusions>", exclusions)
    };
    format!(
        "<dependency><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version>{}{}</dependency>",
        parts[0], parts[1], parts[2], scope, exclusions
    )
}

pub fn pom_xml(coordinate: &Coordinate, packaging: &str, dependencies: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <groupId>{}</groupId>
  <artifactId>{}</artifactId>
  <version>{}</version>
  <packaging>{}</packaging>
  <dependencies>{}</dependencies>
</project>"#,
        coordinate.group_id(),
        coordinate.artifact_id(),
        coordinate.version(),
        packaging,
        dependencies
    )
}
