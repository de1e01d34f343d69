//! POM model
//!
//! Only the parts of a POM that affect the runtime classpath are read: identity,
//! parent, properties, dependency management and dependencies. Profiles, build
//! sections and repositories declared inside POMs are ignored.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

use crate::coordinate::{ArtifactKey, Coordinate};

/// `groupId:artifactId` pair excluded from a dependency's subtree (`*` matches anything)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusion {
    pub group_id: String,
    pub artifact_id: String,
}

impl Exclusion {
    pub fn matches(&self, group_id: &str, artifact_id: &str) -> bool {
        (self.group_id == "*" || self.group_id == group_id)
            && (self.artifact_id == "*" || self.artifact_id == artifact_id)
    }
}

/// A `<dependency>` element, before or after interpolation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dependency {
    pub group_id: String,
    pub artifact_id: String,
    pub version: Option<String>,
    pub classifier: Option<String>,
    pub dep_type: Option<String>,
    pub scope: Option<String>,
    pub optional: bool,
    pub exclusions: Vec<Exclusion>,
}

impl Dependency {
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            group_id: self.group_id.clone(),
            artifact_id: self.artifact_id.clone(),
            classifier: self.classifier.clone(),
        }
    }

    pub fn dep_type(&self) -> &str {
        self.dep_type.as_deref().unwrap_or("jar")
    }

    pub fn scope(&self) -> &str {
        self.scope.as_deref().unwrap_or("compile")
    }

    /// Whether the dependency belongs on a consumer's runtime classpath
    pub fn is_runtime_transitive(&self) -> bool {
        !self.optional && matches!(self.scope(), "compile" | "runtime")
    }

    pub fn is_bom_import(&self) -> bool {
        self.scope() == "import" && self.dep_type() == "pom"
    }

    fn interpolate(&mut self, properties: &HashMap<String, String>) {
        self.group_id = interpolate(&self.group_id, properties);
        self.artifact_id = interpolate(&self.artifact_id, properties);
        for field in [
            &mut self.version,
            &mut self.classifier,
            &mut self.dep_type,
            &mut self.scope,
        ] {
            if let Some(value) = field.as_mut() {
                *value = interpolate(value, properties);
            }
        }
    }

    /// Fill version and scope from a managed entry; declared values win
    fn apply_management(&mut self, managed: &Dependency) {
        if self.version.is_none() {
            self.version = managed.version.clone();
        }
        if self.scope.is_none() {
            self.scope = managed.scope.clone();
        }
        if self.exclusions.is_empty() {
            self.exclusions = managed.exclusions.clone();
        }
    }
}

/// A POM exactly as written in its file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPom {
    pub group_id: Option<String>,
    pub artifact_id: String,
    pub version: Option<String>,
    pub packaging: Option<String>,
    pub parent: Option<Coordinate>,
    pub properties: HashMap<String, String>,
    pub dependency_management: Vec<Dependency>,
    pub dependencies: Vec<Dependency>,
}

/// A POM with parent inheritance, properties and management applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectivePom {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub packaging: String,
    pub properties: HashMap<String, String>,
    pub dependency_management: Vec<Dependency>,
    pub dependencies: Vec<Dependency>,
}

impl EffectivePom {
    /// Whether this artifact ships a jar (as opposed to a pure POM aggregate)
    pub fn has_jar(&self) -> bool {
        self.packaging != "pom"
    }
}

impl RawPom {
    /// Parse POM XML
    pub fn parse(xml: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut pom = RawPom::default();
        let mut stack: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut parent = (None::<String>, None::<String>, None::<String>);
        let mut dependency: Option<Dependency> = None;
        let mut exclusion: Option<Exclusion> = None;

        loop {
            match reader.read_event() {
                Err(e) => {
                    return Err(format!(
                        "XML error at position {}: {}",
                        reader.buffer_position(),
                        e
                    ))
                }
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    text.clear();
                    match name.as_str() {
                        "dependency" if in_dependency_list(&stack) => {
                            dependency = Some(Dependency::default())
                        }
                        "exclusion" if dependency.is_some() => exclusion = Some(Exclusion::default()),
                        _ => {}
                    }
                    stack.push(name);
                }
                Ok(Event::Text(t)) => {
                    let value = t.unescape().map_err(|e| e.to_string())?;
                    text.push_str(&value);
                }
                Ok(Event::CData(c)) => {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
                Ok(Event::End(_)) => {
                    let value = std::mem::take(&mut text).trim().to_string();
                    let path: Vec<&str> = stack.iter().map(String::as_str).collect();

                    match path.as_slice() {
                        ["project", "groupId"] => pom.group_id = Some(value),
                        ["project", "artifactId"] => pom.artifact_id = value,
                        ["project", "version"] => pom.version = Some(value),
                        ["project", "packaging"] => pom.packaging = Some(value),
                        ["project", "parent", "groupId"] => parent.0 = Some(value),
                        ["project", "parent", "artifactId"] => parent.1 = Some(value),
                        ["project", "parent", "version"] => parent.2 = Some(value),
                        ["project", "properties", key] => {
                            pom.properties.insert(key.to_string(), value);
                        }
                        [.., "dependency", "exclusions", "exclusion", field] => {
                            if let Some(excl) = exclusion.as_mut() {
                                match *field {
                                    "groupId" => excl.group_id = value,
                                    "artifactId" => excl.artifact_id = value,
                                    _ => {}
                                }
                            }
                        }
                        [.., "dependency", "exclusions", "exclusion"] => {
                            if let (Some(dep), Some(excl)) = (dependency.as_mut(), exclusion.take())
                            {
                                dep.exclusions.push(excl);
                            }
                        }
                        [.., "dependencies", "dependency", field] => {
                            if let Some(dep) = dependency.as_mut() {
                                set_dependency_field(dep, field, value);
                            }
                        }
                        ["project", "dependencies", "dependency"] => {
                            if let Some(dep) = dependency.take() {
                                pom.dependencies.push(dep);
                            }
                        }
                        ["project", "dependencyManagement", "dependencies", "dependency"] => {
                            if let Some(dep) = dependency.take() {
                                pom.dependency_management.push(dep);
                            }
                        }
                        _ => {}
                    }
                    stack.pop();
                }
                Ok(_) => {}
            }
        }

        if stack.first().is_some() {
            return Err("unexpected end of document".to_string());
        }
        if pom.artifact_id.is_empty() {
            return Err("missing <artifactId>".to_string());
        }

        if let (Some(g), Some(a), Some(v)) = parent {
            pom.parent = Some(Coordinate::new(g, a, v));
        }

        Ok(pom)
    }

    /// Apply inheritance from an already effective parent and interpolate properties
    pub fn effective(&self, parent: Option<&EffectivePom>) -> Result<EffectivePom, String> {
        let group_id = self
            .group_id
            .clone()
            .or_else(|| parent.map(|p| p.group_id.clone()))
            .ok_or("missing <groupId> and no parent")?;
        let version = self
            .version
            .clone()
            .or_else(|| parent.map(|p| p.version.clone()))
            .ok_or("missing <version> and no parent")?;

        let mut properties = parent.map(|p| p.properties.clone()).unwrap_or_default();
        properties.extend(self.properties.clone());
        if let Some(p) = parent {
            properties.insert("project.parent.groupId".into(), p.group_id.clone());
            properties.insert("project.parent.version".into(), p.version.clone());
            properties.insert("parent.version".into(), p.version.clone());
        }
        properties.insert("project.groupId".into(), group_id.clone());
        properties.insert("project.artifactId".into(), self.artifact_id.clone());
        properties.insert("project.version".into(), version.clone());
        properties.insert("pom.version".into(), version.clone());
        properties.insert("version".into(), version.clone());

        let group_id = interpolate(&group_id, &properties);
        let version = interpolate(&version, &properties);

        let mut management = parent
            .map(|p| p.dependency_management.clone())
            .unwrap_or_default();
        for managed in &self.dependency_management {
            let mut managed = managed.clone();
            managed.interpolate(&properties);
            upsert(&mut management, managed);
        }

        let mut dependencies = parent.map(|p| p.dependencies.clone()).unwrap_or_default();
        for declared in &self.dependencies {
            let mut declared = declared.clone();
            declared.interpolate(&properties);
            upsert(&mut dependencies, declared);
        }

        Ok(EffectivePom {
            group_id,
            artifact_id: self.artifact_id.clone(),
            version,
            packaging: self.packaging.clone().unwrap_or_else(|| "jar".to_string()),
            properties,
            dependency_management: management,
            dependencies,
        })
    }
}

impl EffectivePom {
    /// Merge managed entries from an imported BOM; entries already present win
    pub fn import_management(&mut self, bom: &EffectivePom) {
        for managed in &bom.dependency_management {
            if !self
                .dependency_management
                .iter()
                .any(|m| m.key() == managed.key())
            {
                self.dependency_management.push(managed.clone());
            }
        }
    }

    /// Fill unversioned dependencies from dependency management
    pub fn apply_management(&mut self) {
        let management = self.dependency_management.clone();
        for dependency in &mut self.dependencies {
            if let Some(managed) = management.iter().find(|m| m.key() == dependency.key()) {
                dependency.apply_management(managed);
            }
        }
    }
}

fn upsert(list: &mut Vec<Dependency>, dependency: Dependency) {
    match list.iter_mut().find(|d| d.key() == dependency.key()) {
        Some(existing) => *existing = dependency,
        None => list.push(dependency),
    }
}

fn in_dependency_list(stack: &[String]) -> bool {
    let path: Vec<&str> = stack.iter().map(String::as_str).collect();
    matches!(
        path.as_slice(),
        ["project", "dependencies"] | ["project", "dependencyManagement", "dependencies"]
    )
}

fn set_dependency_field(dep: &mut Dependency, field: &str, value: String) {
    match field {
        "groupId" => dep.group_id = value,
        "artifactId" => dep.artifact_id = value,
        "version" => dep.version = Some(value),
        "classifier" => dep.classifier = Some(value).filter(|v| !v.is_empty()),
        "type" => dep.dep_type = Some(value),
        "scope" => dep.scope = Some(value),
        "optional" => dep.optional = value.eq_ignore_ascii_case("true"),
        _ => {}
    }
}

/// Replace `${name}` references; unknown properties are left untouched
pub fn interpolate(value: &str, properties: &HashMap<String, String>) -> String {
    let mut current = value.to_string();
    // nested references resolve in a few passes; the bound stops self-references
    for _ in 0..8 {
        let mut out = String::with_capacity(current.len());
        let mut rest = current.as_str();
        let mut changed = false;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            match rest[start + 2..].find('}') {
                Some(end) => {
                    let name = &rest[start + 2..start + 2 + end];
                    match properties.get(name) {
                        Some(replacement) => {
                            out.push_str(replacement);
                            changed = true;
                        }
                        None => out.push_str(&rest[start..start + 3 + end]),
                    }
                    rest = &rest[start + 3 + end..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);

        if !changed {
            return out;
        }
        current = out;
    }
    current
}
