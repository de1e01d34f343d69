//! Shared fixtures for assembler tests

#![allow(dead_code)]

use hivemq_testkit_resolver::{Coordinate, ResolvedArtifact};
use std::path::Path;

/// Write a fake jar into `repo` and describe it as a resolved artifact
pub fn jar(repo: &Path, coordinate: &str, content: &[u8]) -> ResolvedArtifact {
    let coordinate = Coordinate::parse(coordinate).expect("coordinate");
    let path = repo.join(coordinate.repository_path("jar"));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    ResolvedArtifact::new(coordinate, path, true)
}
