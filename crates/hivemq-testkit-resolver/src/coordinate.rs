//! Maven coordinates and repository layout

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ResolutionError;

/// Identity of a resolvable artifact: `groupId:artifactId:version[:classifier]`
///
/// Immutable once built; used as the key into the artifact cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    group_id: String,
    artifact_id: String,
    version: String,
    classifier: Option<String>,
}

/// Version-less identity used for mediation: one version per key per resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub group_id: String,
    pub artifact_id: String,
    pub classifier: Option<String>,
}

impl Coordinate {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            classifier: None,
        }
    }

    /// Same coordinate with a classifier; an empty classifier clears it
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        let classifier = classifier.into();
        self.classifier = (!classifier.is_empty()).then_some(classifier);
        self
    }

    /// Parse `groupId:artifactId:version` or `groupId:artifactId:version:classifier`
    pub fn parse(input: &str) -> Result<Self, ResolutionError> {
        let parts: Vec<&str> = input.trim().split(':').collect();
        if !(3..=4).contains(&parts.len()) || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(ResolutionError::invalid_coordinate(input));
        }

        let coordinate = Self::new(parts[0].trim(), parts[1].trim(), parts[2].trim());
        Ok(match parts.get(3) {
            Some(classifier) => coordinate.with_classifier(classifier.trim()),
            None => coordinate,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            group_id: self.group_id.clone(),
            artifact_id: self.artifact_id.clone(),
            classifier: self.classifier.clone(),
        }
    }

    /// The coordinate of this artifact's POM (POMs never carry a classifier)
    pub fn pom_coordinate(&self) -> Self {
        Self {
            classifier: None,
            ..self.clone()
        }
    }

    /// File name inside the repository, e.g. `guava-33.0.0-jre.jar`
    pub fn file_name(&self, extension: &str) -> String {
        match &self.classifier {
            Some(classifier) => format!(
                "{}-{}-{}.{}",
                self.artifact_id, self.version, classifier, extension
            ),
            None => format!("{}-{}.{}", self.artifact_id, self.version, extension),
        }
    }

    /// Path relative to a repository root, using `/` separators
    pub fn repository_path(&self, extension: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.group_id.replace('.', "/"),
            self.artifact_id,
            self.version,
            self.file_name(extension)
        )
    }

    /// Readable jar name for an extension's `lib/` folder, `<group>.<artifact>-<version>.jar`
    pub fn lib_file_name(&self) -> String {
        format!("{}.{}", self.group_id, self.file_name("jar"))
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        Ok(())
    }
}

impl FromStr for Coordinate {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.artifact_id)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        Ok(())
    }
}
