//! Transitive dependency resolution with nearest-wins mediation and DFS topological order

use futures::future::{try_join_all, BoxFuture, FutureExt};
use hivemq_testkit_core::MavenSettings;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::ArtifactCache;
use crate::coordinate::{ArtifactKey, Coordinate};
use crate::error::ResolutionError;
use crate::pom::{Dependency, EffectivePom, Exclusion, RawPom};
use crate::source::{ArtifactSource, MavenRepositories};

/// Longest parent/BOM chain followed before the POM is declared malformed
const MAX_POM_DEPTH: usize = 32;

/// One artifact of a resolution result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    coordinate: Coordinate,
    path: PathBuf,
    transitive: bool,
}

impl ResolvedArtifact {
    pub fn new(coordinate: Coordinate, path: impl Into<PathBuf>, transitive: bool) -> Self {
        Self {
            coordinate,
            path: path.into(),
            transitive,
        }
    }

    pub fn coordinate(&self) -> &Coordinate {
        &self.coordinate
    }

    /// Absolute path of the jar in the local repository
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// False for the coordinates passed to `resolve`, true for everything pulled in by them
    pub fn is_transitive(&self) -> bool {
        self.transitive
    }
}

/// A mediated node of the dependency graph
struct Node {
    coordinate: Coordinate,
    transitive: bool,
    ships_jar: bool,
    children: Vec<ArtifactKey>,
}

/// Resolves Maven coordinates into an ordered set of local jar files
///
/// The resolver itself is stateless; all memoization lives in the shared [`ArtifactCache`].
pub struct DependencyResolver {
    source: Arc<dyn ArtifactSource>,
    cache: Arc<ArtifactCache>,
}

impl DependencyResolver {
    pub fn new(source: Arc<dyn ArtifactSource>, cache: Arc<ArtifactCache>) -> Self {
        Self { source, cache }
    }

    /// Resolver backed by the configured local and remote Maven repositories
    pub fn from_settings(
        settings: &MavenSettings,
        cache: Arc<ArtifactCache>,
    ) -> Result<Self, ResolutionError> {
        let source = MavenRepositories::from_settings(settings)?;
        Ok(Self::new(Arc::new(source), cache))
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Resolve `roots` and their runtime closure
    ///
    /// Every dependency precedes its dependents in the returned sequence, and the
    /// sequence does not depend on the order of `roots`. Failures are returned as-is;
    /// nothing is retried.
    pub async fn resolve(
        &self,
        roots: &[Coordinate],
    ) -> Result<Vec<ResolvedArtifact>, ResolutionError> {
        let mut roots = roots.to_vec();
        roots.sort();
        roots.dedup();

        if roots.is_empty() {
            return Ok(Vec::new());
        }

        let (graph, root_keys) = self.mediate(&roots).await?;
        let order = topological_order(&root_keys, &graph)?;

        let wanted: Vec<&Node> = order
            .iter()
            .filter_map(|key| graph.get(key))
            .filter(|node| node.ships_jar)
            .collect();

        debug!(
            "Resolved {} root(s) into {} artifact(s)",
            roots.len(),
            wanted.len()
        );

        let paths = try_join_all(wanted.iter().map(|node| self.jar(&node.coordinate))).await?;

        Ok(wanted
            .into_iter()
            .zip(paths)
            .map(|(node, path)| ResolvedArtifact::new(node.coordinate.clone(), path, node.transitive))
            .collect())
    }

    /// Breadth-first walk that picks one version per key (nearest wins)
    async fn mediate(
        &self,
        roots: &[Coordinate],
    ) -> Result<(HashMap<ArtifactKey, Node>, Vec<ArtifactKey>), ResolutionError> {
        let mut graph: HashMap<ArtifactKey, Node> = HashMap::new();
        let mut queue: VecDeque<(ArtifactKey, Vec<Exclusion>)> = VecDeque::new();
        let mut root_keys = Vec::new();

        for root in roots {
            let key = root.key();
            if let Some(existing) = graph.get(&key) {
                warn!(
                    "Ignoring {} because {} was requested as well",
                    root, existing.coordinate
                );
                continue;
            }
            graph.insert(
                key.clone(),
                Node {
                    coordinate: root.clone(),
                    transitive: false,
                    ships_jar: true,
                    children: Vec::new(),
                },
            );
            root_keys.push(key.clone());
            queue.push_back((key, Vec::new()));
        }

        while let Some((key, exclusions)) = queue.pop_front() {
            let coordinate = match graph.get(&key) {
                Some(node) => node.coordinate.clone(),
                None => continue,
            };

            let pom = self.effective_pom(&coordinate, 0).await?;
            let mut children = Vec::new();

            for dependency in pom.dependencies.iter().filter(|d| follows(d, &exclusions)) {
                let child = dependency_coordinate(&coordinate, dependency)?;
                let child_key = child.key();
                children.push(child_key.clone());

                if graph.contains_key(&child_key) {
                    continue;
                }

                let mut child_exclusions = exclusions.clone();
                child_exclusions.extend(dependency.exclusions.iter().cloned());

                graph.insert(
                    child_key.clone(),
                    Node {
                        coordinate: child,
                        transitive: true,
                        ships_jar: dependency.dep_type() == "jar",
                        children: Vec::new(),
                    },
                );
                queue.push_back((child_key, child_exclusions));
            }

            if let Some(node) = graph.get_mut(&key) {
                node.ships_jar &= pom.has_jar();
                node.children = children;
            }
        }

        Ok((graph, root_keys))
    }

    /// POM with parents, BOM imports and dependency management applied
    fn effective_pom<'a>(
        &'a self,
        coordinate: &'a Coordinate,
        depth: usize,
    ) -> BoxFuture<'a, Result<EffectivePom, ResolutionError>> {
        async move {
            if depth > MAX_POM_DEPTH {
                return Err(ResolutionError::malformed_pom(
                    coordinate,
                    "parent or import chain is too deep (possible cycle)",
                ));
            }

            let raw = self.raw_pom(coordinate).await?;
            let parent = match &raw.parent {
                Some(parent) => Some(self.effective_pom(parent, depth + 1).await?),
                None => None,
            };

            let mut pom = raw
                .effective(parent.as_ref())
                .map_err(|message| ResolutionError::malformed_pom(coordinate, message))?;

            let imports: Vec<Dependency> = pom
                .dependency_management
                .iter()
                .filter(|d| d.is_bom_import())
                .cloned()
                .collect();
            pom.dependency_management.retain(|d| !d.is_bom_import());

            for import in imports {
                let bom = dependency_coordinate(coordinate, &import)?;
                let bom = self.effective_pom(&bom, depth + 1).await?;
                pom.import_management(&bom);
            }

            pom.apply_management();
            Ok(pom)
        }
        .boxed()
    }

    async fn raw_pom(&self, coordinate: &Coordinate) -> Result<Arc<RawPom>, ResolutionError> {
        let coordinate = coordinate.pom_coordinate();
        self.cache
            .pom(&coordinate, || async {
                let path = self
                    .cache
                    .file(&coordinate, "pom", || self.source.fetch(&coordinate, "pom"))
                    .await?;
                let xml = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| ResolutionError::cache(&coordinate, e))?;
                let pom = RawPom::parse(&xml)
                    .map_err(|message| ResolutionError::malformed_pom(&coordinate, message))?;
                Ok(Arc::new(pom))
            })
            .await
    }

    async fn jar(&self, coordinate: &Coordinate) -> Result<PathBuf, ResolutionError> {
        self.cache
            .file(coordinate, "jar", || self.source.fetch(coordinate, "jar"))
            .await
    }
}

/// Whether a declared dependency is part of the runtime closure on this path
fn follows(dependency: &Dependency, exclusions: &[Exclusion]) -> bool {
    dependency.is_runtime_transitive()
        && matches!(dependency.dep_type(), "jar" | "pom")
        && !exclusions
            .iter()
            .any(|e| e.matches(&dependency.group_id, &dependency.artifact_id))
}

fn dependency_coordinate(
    owner: &Coordinate,
    dependency: &Dependency,
) -> Result<Coordinate, ResolutionError> {
    let version = dependency.version.as_deref().ok_or_else(|| {
        ResolutionError::malformed_pom(
            owner,
            format!(
                "dependency {}:{} has no version",
                dependency.group_id, dependency.artifact_id
            ),
        )
    })?;

    let coordinate = Coordinate::new(&dependency.group_id, &dependency.artifact_id, version);
    Ok(match &dependency.classifier {
        Some(classifier) => coordinate.with_classifier(classifier.as_str()),
        None => coordinate,
    })
}

/// DFS post-order from the (sorted) roots; children in declaration order
fn topological_order(
    roots: &[ArtifactKey],
    graph: &HashMap<ArtifactKey, Node>,
) -> Result<Vec<ArtifactKey>, ResolutionError> {
    let mut resolved = Vec::new();
    let mut seen = HashSet::new();
    let mut visiting = Vec::new();

    for root in roots {
        visit(root, graph, &mut resolved, &mut seen, &mut visiting)?;
    }
    Ok(resolved)
}

fn visit(
    key: &ArtifactKey,
    graph: &HashMap<ArtifactKey, Node>,
    resolved: &mut Vec<ArtifactKey>,
    seen: &mut HashSet<ArtifactKey>,
    visiting: &mut Vec<ArtifactKey>,
) -> Result<(), ResolutionError> {
    if let Some(start) = visiting.iter().position(|k| k == key) {
        let label = |k: &ArtifactKey| {
            graph
                .get(k)
                .map(|n| n.coordinate.to_string())
                .unwrap_or_else(|| k.to_string())
        };
        let mut cycle: Vec<String> = visiting[start..].iter().map(label).collect();
        cycle.push(label(key));
        return Err(ResolutionError::CyclicDependency {
            cycle: cycle.join(" -> "),
        });
    }

    if seen.contains(key) {
        return Ok(());
    }

    visiting.push(key.clone());
    if let Some(node) = graph.get(key) {
        for child in &node.children {
            visit(child, graph, resolved, seen, visiting)?;
        }
    }
    visiting.pop();

    seen.insert(key.clone());
    resolved.push(key.clone());
    Ok(())
}
