//! Integration tests for transitive resolution

mod common;

use common::{dependency_xml, pom_xml, InMemorySource};
use hivemq_testkit_resolver::{
    ArtifactCache, Coordinate, DependencyResolver, ResolutionError, ResolutionErrorKind,
};
use std::sync::Arc;
use std::time::Duration;

fn resolver(source: &Arc<InMemorySource>) -> DependencyResolver {
    DependencyResolver::new(source.clone(), ArtifactCache::shared())
}

fn coordinates(artifacts: &[hivemq_testkit_resolver::ResolvedArtifact]) -> Vec<String> {
    artifacts.iter().map(|a| a.coordinate().to_string()).collect()
}

#[tokio::test]
async fn test_single_dependency_precedes_dependent() {
    let source = Arc::new(InMemorySource::new());
    let a = source.publish("lib:A:1.0", &["lib:B:2.0"]);
    source.publish("lib:B:2.0", &[]);

    let resolved = resolver(&source).resolve(&[a]).await.unwrap();

    assert_eq!(coordinates(&resolved), vec!["lib:B:2.0", "lib:A:1.0"]);
    assert!(resolved[0].is_transitive());
    assert!(!resolved[1].is_transitive());
    assert!(resolved.iter().all(|r| r.path().is_absolute() && r.path().exists()));
}

#[tokio::test]
async fn test_diamond_is_topological_and_input_order_independent() {
    let source = Arc::new(InMemorySource::new());
    let app = source.publish("org.app:app:1", &["org.lib:left:1", "org.lib:right:1"]);
    source.publish("org.lib:left:1", &["org.lib:base:1"]);
    source.publish("org.lib:right:1", &["org.lib:base:1"]);
    source.publish("org.lib:base:1", &[]);
    let extra = source.publish("org.extra:extra:1", &[]);

    let first = resolver(&source)
        .resolve(&[app.clone(), extra.clone()])
        .await
        .unwrap();
    let second = resolver(&source).resolve(&[extra, app]).await.unwrap();

    assert_eq!(
        coordinates(&first),
        vec![
            "org.lib:base:1",
            "org.lib:left:1",
            "org.lib:right:1",
            "org.app:app:1",
            "org.extra:extra:1",
        ]
    );
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_nearest_version_wins() {
    let source = Arc::new(InMemorySource::new());
    // app -> util:2 directly, and app -> mid -> util:1 transitively
    let app = source.publish("g:app:1", &["g:mid:1", "g:util:2"]);
    source.publish("g:mid:1", &["g:util:1"]);
    source.publish("g:util:1", &[]);
    source.publish("g:util:2", &[]);

    let resolved = resolver(&source).resolve(&[app]).await.unwrap();

    assert_eq!(coordinates(&resolved), vec!["g:util:2", "g:mid:1", "g:app:1"]);
    assert_eq!(source.fetch_count(&Coordinate::new("g", "util", "1"), "jar"), 0);
}

#[tokio::test]
async fn test_scopes_optional_and_exclusions_are_skipped() {
    let source = Arc::new(InMemorySource::new());
    let app = Coordinate::new("g", "app", "1");
    let deps = [
        dependency_xml("g:compiled:1", &["g:excluded"]),
        dependency_xml("g:tested:1:test", &[]),
        dependency_xml("g:provided:1:provided", &[]),
        dependency_xml("g:runtime:1:runtime", &[]),
        "<dependency><groupId>g</groupId><artifactId>opt</artifactId><version>1</version><optional>true</optional></dependency>".to_string(),
    ]
    .concat();
    source.publish_pom(&app, &pom_xml(&app, "jar", &deps));
    source.publish_jar(&app);
    source.publish("g:compiled:1", &["g:excluded:1", "g:kept:1"]);
    source.publish("g:kept:1", &[]);
    source.publish("g:runtime:1", &[]);

    let resolved = resolver(&source).resolve(&[app]).await.unwrap();

    assert_eq!(
        coordinates(&resolved),
        vec!["g:kept:1", "g:compiled:1", "g:runtime:1", "g:app:1"]
    );
}

#[tokio::test]
async fn test_pom_packaging_contributes_dependencies_but_no_file() {
    let source = Arc::new(InMemorySource::new());
    let bundle = Coordinate::new("g", "bundle", "1");
    source.publish_pom(
        &bundle,
        &pom_xml(&bundle, "pom", &dependency_xml("g:member:1", &[])),
    );
    source.publish("g:member:1", &[]);

    let resolved = resolver(&source).resolve(&[bundle.clone()]).await.unwrap();

    assert_eq!(coordinates(&resolved), vec!["g:member:1"]);
    assert_eq!(source.fetch_count(&bundle, "jar"), 0);
}

#[tokio::test]
async fn test_parent_management_supplies_versions() {
    let source = Arc::new(InMemorySource::new());
    let parent = Coordinate::new("g", "parent", "3");
    source.publish_pom(
        &parent,
        r#"<project>
  <groupId>g</groupId><artifactId>parent</artifactId><version>3</version>
  <packaging>pom</packaging>
  <properties><util.version>4.2</util.version></properties>
  <dependencyManagement><dependencies>
    <dependency><groupId>g</groupId><artifactId>util</artifactId><version>${util.version}</version></dependency>
  </dependencies></dependencyManagement>
</project>"#,
    );
    let child = Coordinate::new("g", "child", "3");
    source.publish_pom(
        &child,
        r#"<project>
  <parent><groupId>g</groupId><artifactId>parent</artifactId><version>3</version></parent>
  <artifactId>child</artifactId>
  <dependencies>
    <dependency><groupId>g</groupId><artifactId>util</artifactId></dependency>
  </dependencies>
</project>"#,
    );
    source.publish_jar(&child);
    source.publish("g:util:4.2", &[]);

    let resolved = resolver(&source).resolve(&[child]).await.unwrap();

    assert_eq!(coordinates(&resolved), vec!["g:util:4.2", "g:child:3"]);
}

#[tokio::test]
async fn test_repeated_resolution_is_idempotent() {
    let source = Arc::new(InMemorySource::new());
    let a = source.publish("lib:A:1.0", &["lib:B:2.0"]);
    source.publish("lib:B:2.0", &[]);
    let resolver = resolver(&source);

    let first = resolver.resolve(&[a.clone()]).await.unwrap();
    let fetches = source.total_fetches();
    let second = resolver.resolve(&[a]).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(source.total_fetches(), fetches);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolutions_fetch_each_file_once() {
    let source = Arc::new(InMemorySource::new().with_delay(Duration::from_millis(25)));
    let a = source.publish("lib:A:1.0", &["lib:B:2.0"]);
    source.publish("lib:B:2.0", &[]);
    let cache = ArtifactCache::shared();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let resolver = DependencyResolver::new(source.clone(), cache.clone());
        let roots = vec![a.clone()];
        handles.push(tokio::spawn(async move { resolver.resolve(&roots).await }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert!(results.windows(2).all(|w| w[0] == w[1]));
    for coordinate in [&a, &Coordinate::new("lib", "B", "2.0")] {
        assert_eq!(source.fetch_count(coordinate, "jar"), 1, "{}", coordinate);
        assert_eq!(source.fetch_count(coordinate, "pom"), 1, "{}", coordinate);
    }
}

#[tokio::test]
async fn test_cycle_is_reported() {
    let source = Arc::new(InMemorySource::new());
    let a = source.publish("g:a:1", &["g:b:1"]);
    source.publish("g:b:1", &["g:a:1"]);

    let err = resolver(&source).resolve(&[a]).await.unwrap_err();

    match err {
        ResolutionError::CyclicDependency { cycle } => {
            assert_eq!(cycle, "g:a:1 -> g:b:1 -> g:a:1");
        }
        other => panic!("expected cycle, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_artifact_is_not_found_and_retry_refetches() {
    let source = Arc::new(InMemorySource::new());
    let a = source.publish("lib:A:1.0", &["lib:missing:9"]);
    let resolver = resolver(&source);

    let err = resolver.resolve(&[a.clone()]).await.unwrap_err();
    assert_eq!(err.kind(), ResolutionErrorKind::NotFound);
    assert_eq!(err.coordinate(), Some(&Coordinate::new("lib", "missing", "9")));

    // the failure is not memoized, so publishing the artifact makes a retry succeed
    source.publish("lib:missing:9", &[]);
    let resolved = resolver.resolve(&[a]).await.unwrap();
    assert_eq!(coordinates(&resolved), vec!["lib:missing:9", "lib:A:1.0"]);
}

#[tokio::test]
async fn test_empty_input_resolves_to_nothing() {
    let source = Arc::new(InMemorySource::new());
    assert!(resolver(&source).resolve(&[]).await.unwrap().is_empty());
    assert_eq!(source.total_fetches(), 0);
}
