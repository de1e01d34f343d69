//! Class and resource entries of an extension

use std::fs;
use std::path::{Component, Path};
use walkdir::WalkDir;

use crate::error::AssemblyError;

/// A compiled class, addressed by its binary name (`com.acme.Main`, `com.acme.Main$Inner`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEntry {
    class_name: String,
    bytes: Vec<u8>,
}

impl ClassEntry {
    pub fn new(class_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            class_name: class_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Package-derived path, e.g. `com/acme/Main.class`
    pub fn relative_path(&self) -> Result<String, AssemblyError> {
        let name = self.class_name.trim();
        if name.is_empty() || name.split('.').any(str::is_empty) || name.contains(['/', '\\']) {
            return Err(AssemblyError::invalid_path(&self.class_name));
        }
        Ok(format!("{}.class", name.replace('.', "/")))
    }

    /// Every `*.class` file below `root` (a compiler output directory), in path order
    pub fn collect_dir(root: &Path) -> Result<Vec<Self>, AssemblyError> {
        walk(root, |relative| relative.ends_with(".class"))?
            .into_iter()
            .map(|(relative, bytes)| {
                let class_name = relative.trim_end_matches(".class").replace('/', ".");
                Ok(Self::new(class_name, bytes))
            })
            .collect()
    }
}

/// A non-class file, addressed by its path relative to the extension root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    path: String,
    bytes: Vec<u8>,
}

impl ResourceEntry {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Normalized `/`-separated path; absolute paths and `..` are rejected
    pub fn relative_path(&self) -> Result<String, AssemblyError> {
        normalize(&self.path)
    }

    /// Every file below `root` that is not a `.class` file, in path order
    pub fn collect_dir(root: &Path) -> Result<Vec<Self>, AssemblyError> {
        Ok(walk(root, |relative| !relative.ends_with(".class"))?
            .into_iter()
            .map(|(relative, bytes)| Self::new(relative, bytes))
            .collect())
    }
}

/// Validate and normalize an entry path
pub(crate) fn normalize(raw: &str) -> Result<String, AssemblyError> {
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(AssemblyError::invalid_path(raw));
    }

    let mut segments = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return Err(AssemblyError::invalid_path(raw)),
        }
    }

    if segments.is_empty() {
        return Err(AssemblyError::invalid_path(raw));
    }
    Ok(segments.join("/"))
}

fn walk(
    root: &Path,
    include: impl Fn(&str) -> bool,
) -> Result<Vec<(String, Vec<u8>)>, AssemblyError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            AssemblyError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| AssemblyError::invalid_path(entry.path().display().to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if include(&relative) {
            let bytes = fs::read(entry.path()).map_err(|e| AssemblyError::io(entry.path(), e))?;
            files.push((relative, bytes));
        }
    }

    Ok(files)
}
