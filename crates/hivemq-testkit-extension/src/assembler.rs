//! Deterministic extension assembly
//!
//! Layout of an assembled extension, rooted at a directory named after the descriptor id:
//!
//! ```text
//! <id>/
//!   hivemq-extension.xml
//!   DISABLED                      (only when disabled on startup)
//!   com/acme/Main.class           (classes, package-derived paths)
//!   config.xml                    (resources)
//!   lib/<group>.<artifact>-<version>[-<classifier>].jar
//! ```
//!
//! A lib whose readable name is already used by another coordinate gets an
//! 8-hex-digit SHA-256 suffix of its coordinate.
//!
//! The tar rendering of this layout is byte-for-byte reproducible: fixed metadata,
//! directories first, file entries in a fixed order and libs in resolver order.

use hivemq_testkit_resolver::{Coordinate, ResolvedArtifact};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tar::{EntryType, Header};
use tempfile::TempDir;
use tracing::debug;

use crate::descriptor::{DescriptorFields, ExtensionDescriptor, DESCRIPTOR_FILE_NAME};
use crate::entry::{ClassEntry, ResourceEntry};
use crate::error::AssemblyError;

/// Directory holding third-party jars
pub const LIB_DIR: &str = "lib";

/// Marker file that keeps the broker from starting the extension
pub const DISABLED_MARKER: &str = "DISABLED";

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// Builds [`PackagedExtension`]s
#[derive(Debug, Clone, Default)]
pub struct ArchiveAssembler {
    disabled_on_startup: bool,
}

impl ArchiveAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Package the extension with a `DISABLED` marker
    pub fn disabled_on_startup(mut self, disabled: bool) -> Self {
        self.disabled_on_startup = disabled;
        self
    }

    /// Validate the descriptor, then lay out classes, resources and libs
    pub fn assemble(
        &self,
        classes: &[ClassEntry],
        resources: &[ResourceEntry],
        libs: &[ResolvedArtifact],
        descriptor: &DescriptorFields,
    ) -> Result<PackagedExtension, AssemblyError> {
        let descriptor = ExtensionDescriptor::validate(descriptor.clone())?;
        let descriptor_xml = descriptor
            .render()
            .map_err(|e| AssemblyError::Template(e.to_string()))?;

        let mut entries = BTreeMap::new();
        for class in classes {
            insert_entry(&mut entries, class.relative_path()?, class.bytes())?;
        }
        for resource in resources {
            insert_entry(&mut entries, resource.relative_path()?, resource.bytes())?;
        }
        check_file_directory_clashes(&entries)?;

        let mut package = PackagedExtension {
            descriptor,
            descriptor_xml,
            disabled_on_startup: self.disabled_on_startup,
            entries,
            libs: Vec::new(),
        };
        package.add_libs(libs)?;

        debug!(
            "Assembled extension {} ({} entries, {} libs)",
            package.id(),
            package.entries.len(),
            package.libs.len()
        );
        Ok(package)
    }
}

/// One jar under `lib/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibEntry {
    coordinate: Coordinate,
    file_name: String,
    source: PathBuf,
}

impl LibEntry {
    pub fn coordinate(&self) -> &Coordinate {
        &self.coordinate
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Jar in the local repository this entry is copied from
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// An assembled extension, ready to be materialized or injected into a broker
#[derive(Debug, Clone)]
pub struct PackagedExtension {
    descriptor: ExtensionDescriptor,
    descriptor_xml: String,
    disabled_on_startup: bool,
    entries: BTreeMap<String, Vec<u8>>,
    libs: Vec<LibEntry>,
}

impl PackagedExtension {
    pub fn descriptor(&self) -> &ExtensionDescriptor {
        &self.descriptor
    }

    /// Extension id; also the directory name inside the broker's extension folder
    pub fn id(&self) -> &str {
        self.descriptor.id()
    }

    pub fn is_disabled_on_startup(&self) -> bool {
        self.disabled_on_startup
    }

    pub fn descriptor_xml(&self) -> &str {
        &self.descriptor_xml
    }

    pub fn libs(&self) -> &[LibEntry] {
        &self.libs
    }

    /// Add resolved jars; a coordinate already present is replaced in place (last write wins)
    pub fn add_libs(&mut self, libs: &[ResolvedArtifact]) -> Result<(), AssemblyError> {
        for artifact in libs {
            let metadata =
                fs::metadata(artifact.path()).map_err(|e| AssemblyError::io(artifact.path(), e))?;
            if !metadata.is_file() {
                return Err(AssemblyError::io(
                    artifact.path(),
                    io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
                ));
            }

            let coordinate = artifact.coordinate();
            if let Some(existing) = self.libs.iter_mut().find(|l| &l.coordinate == coordinate) {
                existing.source = artifact.path().to_path_buf();
                continue;
            }

            let mut file_name = coordinate.lib_file_name();
            if self.lib_name_taken(&file_name) {
                file_name = disambiguated_lib_name(coordinate);
                debug!("Lib name for {} is taken; using {}", coordinate, file_name);
                if self.lib_name_taken(&file_name) {
                    return Err(AssemblyError::conflict(format!("{}/{}", LIB_DIR, file_name)));
                }
            }
            self.libs.push(LibEntry {
                coordinate: coordinate.clone(),
                file_name,
                source: artifact.path().to_path_buf(),
            });
        }
        Ok(())
    }

    fn lib_name_taken(&self, file_name: &str) -> bool {
        self.libs.iter().any(|l| l.file_name == file_name)
    }

    /// Relative file paths in output order
    pub fn file_paths(&self) -> Vec<String> {
        let mut paths = vec![DESCRIPTOR_FILE_NAME.to_string()];
        if self.disabled_on_startup {
            paths.push(DISABLED_MARKER.to_string());
        }
        paths.extend(self.entries.keys().cloned());
        paths.extend(self.libs.iter().map(|l| format!("{}/{}", LIB_DIR, l.file_name)));
        paths
    }

    /// Directories implied by the layout, sorted, excluding the root
    fn directories(&self) -> BTreeSet<String> {
        let mut dirs = BTreeSet::new();
        for path in self.entries.keys() {
            let mut current = path.as_str();
            while let Some((parent, _)) = current.rsplit_once('/') {
                dirs.insert(parent.to_string());
                current = parent;
            }
        }
        if !self.libs.is_empty() {
            dirs.insert(LIB_DIR.to_string());
        }
        dirs
    }

    /// Reproducible tar of `<id>/...`
    pub fn to_tar(&self) -> Result<Vec<u8>, AssemblyError> {
        let id = self.id();
        let tar_err = |path: &str, e: io::Error| AssemblyError::io(format!("{}/{}", id, path), e);

        let mut builder = tar::Builder::new(Vec::new());
        builder.mode(tar::HeaderMode::Deterministic);

        append_dir(&mut builder, &format!("{}/", id)).map_err(|e| tar_err("", e))?;
        for dir in self.directories() {
            append_dir(&mut builder, &format!("{}/{}/", id, dir)).map_err(|e| tar_err(dir.as_str(), e))?;
        }

        append_file(
            &mut builder,
            &format!("{}/{}", id, DESCRIPTOR_FILE_NAME),
            self.descriptor_xml.as_bytes(),
        )
        .map_err(|e| tar_err(DESCRIPTOR_FILE_NAME, e))?;
        if self.disabled_on_startup {
            append_file(&mut builder, &format!("{}/{}", id, DISABLED_MARKER), &[])
                .map_err(|e| tar_err(DISABLED_MARKER, e))?;
        }
        for (path, bytes) in &self.entries {
            append_file(&mut builder, &format!("{}/{}", id, path), bytes)
                .map_err(|e| tar_err(path.as_str(), e))?;
        }
        for lib in &self.libs {
            let bytes = fs::read(&lib.source).map_err(|e| AssemblyError::io(&lib.source, e))?;
            let path = format!("{}/{}", LIB_DIR, lib.file_name);
            append_file(&mut builder, &format!("{}/{}", id, path), &bytes)
                .map_err(|e| tar_err(path.as_str(), e))?;
        }

        builder.into_inner().map_err(|e| tar_err("", e))
    }

    /// SHA-256 (hex) of [`to_tar`](Self::to_tar)
    pub fn checksum(&self) -> Result<String, AssemblyError> {
        Ok(format!("{:x}", Sha256::digest(self.to_tar()?)))
    }

    /// Materialize as `<parent>/<id>/`, replacing a previous copy; returns the extension directory
    ///
    /// Callers must not run concurrent `write_to` calls against the same `parent`.
    pub fn write_to(&self, parent: &Path) -> Result<PathBuf, AssemblyError> {
        let root = parent.join(self.id());
        if root.exists() {
            fs::remove_dir_all(&root).map_err(|e| AssemblyError::io(&root, e))?;
        }
        fs::create_dir_all(&root).map_err(|e| AssemblyError::io(&root, e))?;

        write_file(&root.join(DESCRIPTOR_FILE_NAME), self.descriptor_xml.as_bytes())?;
        if self.disabled_on_startup {
            write_file(&root.join(DISABLED_MARKER), &[])?;
        }
        for (path, bytes) in &self.entries {
            write_file(&root.join(path), bytes)?;
        }

        if !self.libs.is_empty() {
            let lib_dir = root.join(LIB_DIR);
            fs::create_dir_all(&lib_dir).map_err(|e| AssemblyError::io(&lib_dir, e))?;
            for lib in &self.libs {
                let target = lib_dir.join(&lib.file_name);
                fs::copy(&lib.source, &target).map_err(|e| AssemblyError::io(&lib.source, e))?;
            }
        }

        debug!("Wrote extension {} to {}", self.id(), root.display());
        Ok(root)
    }

    /// Materialize into a fresh temp directory that lives as long as the returned value
    pub fn stage(&self) -> Result<StagedExtension, AssemblyError> {
        let dir = tempfile::Builder::new()
            .prefix("hivemq-extension-")
            .tempdir()
            .map_err(|e| AssemblyError::io(std::env::temp_dir(), e))?;
        let path = self.write_to(dir.path())?;
        Ok(StagedExtension {
            id: self.id().to_string(),
            path,
            _dir: dir,
        })
    }
}

/// An extension directory on the host; removed when dropped
#[derive(Debug)]
pub struct StagedExtension {
    id: String,
    path: PathBuf,
    _dir: TempDir,
}

impl StagedExtension {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The `<tmp>/<id>` directory
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `<readable name>-<first 8 hex of sha256(coordinate)>.jar`
fn disambiguated_lib_name(coordinate: &Coordinate) -> String {
    let readable = coordinate.lib_file_name();
    let stem = readable.strip_suffix(".jar").unwrap_or(&readable);
    let digest = format!("{:x}", Sha256::digest(coordinate.to_string().as_bytes()));
    format!("{}-{}.jar", stem, &digest[..8])
}

fn insert_entry(
    entries: &mut BTreeMap<String, Vec<u8>>,
    path: String,
    bytes: &[u8],
) -> Result<(), AssemblyError> {
    let reserved = path == DESCRIPTOR_FILE_NAME
        || path == DISABLED_MARKER
        || path == LIB_DIR
        || path.starts_with(&format!("{}/", LIB_DIR));
    if reserved {
        return Err(AssemblyError::conflict(path));
    }

    match entries.get(&path) {
        Some(existing) if existing.as_slice() == bytes => Ok(()),
        Some(_) => Err(AssemblyError::conflict(path)),
        None => {
            entries.insert(path, bytes.to_vec());
            Ok(())
        }
    }
}

/// A path cannot be both a file and the parent directory of another file
fn check_file_directory_clashes(entries: &BTreeMap<String, Vec<u8>>) -> Result<(), AssemblyError> {
    for path in entries.keys() {
        let prefix = format!("{}/", path);
        if let Some((nested, _)) = entries.range(prefix.clone()..).next() {
            if nested.starts_with(&prefix) {
                return Err(AssemblyError::conflict(path.clone()));
            }
        }
    }
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), AssemblyError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AssemblyError::io(parent, e))?;
    }
    fs::write(path, bytes).map_err(|e| AssemblyError::io(path, e))
}

fn header(entry_type: EntryType, size: u64, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn append_dir(builder: &mut tar::Builder<Vec<u8>>, path: &str) -> io::Result<()> {
    let mut header = header(EntryType::Directory, 0, DIR_MODE);
    builder.append_data(&mut header, path, io::empty())
}

fn append_file(builder: &mut tar::Builder<Vec<u8>>, path: &str, bytes: &[u8]) -> io::Result<()> {
    let mut header = header(EntryType::Regular, bytes.len() as u64, FILE_MODE);
    builder.append_data(&mut header, path, bytes)
}
