//! End-to-end graph scenarios over real temporary directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::tempdir;

use hastegraph::config::GraphConfig;
use hastegraph::error::GraphError;
use hastegraph::fastfs::ChangeKind;
use hastegraph::graph::{DependencyGraph, GraphEvent, RequestOptions};
use hastegraph::module::ModuleKind;
use hastegraph::utils::normalize_path;

fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn config_at(root: PathBuf) -> GraphConfig {
    let mut config = GraphConfig::default_config(root);
    config.roots.assets = vec![".".to_string()];
    config.cache.enabled = false;
    config
}

async fn graph_at(root: PathBuf) -> DependencyGraph {
    DependencyGraph::load(config_at(root)).await.unwrap()
}

fn request(entry: &Path, platform: &str) -> RequestOptions {
    let mut options = RequestOptions::new(entry);
    options.platform = Some(platform.to_string());
    options
}

fn paths(response: &hastegraph::Response) -> Vec<PathBuf> {
    response
        .dependencies()
        .iter()
        .map(|m| m.path().to_path_buf())
        .collect()
}

#[tokio::test]
async fn relative_import_with_extension_fallback() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "require('./b');");
    write(&root, "b.js", "");

    let graph = graph_at(root.clone()).await;
    let response = graph
        .get_dependencies(&request(&root.join("a.js"), "ios"))
        .await
        .unwrap();

    assert_eq!(paths(&response), vec![root.join("a.js"), root.join("b.js")]);
    // No haste name: the entry's id is its path.
    assert_eq!(
        response.main_module_id(),
        Some(root.join("a.js").display().to_string().as_str())
    );
    assert!(response.errors().is_empty());
}

#[tokio::test]
async fn platform_override_per_request() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "require('./b');");
    write(&root, "b.js", "");
    write(&root, "b.ios.js", "");

    let graph = graph_at(root.clone()).await;

    let ios = graph
        .get_dependencies(&request(&root.join("a.js"), "ios"))
        .await
        .unwrap();
    assert_eq!(paths(&ios), vec![root.join("a.js"), root.join("b.ios.js")]);

    // The same graph serves a second request for another platform.
    let android = graph
        .get_dependencies(&request(&root.join("a.js"), "android"))
        .await
        .unwrap();
    assert_eq!(paths(&android), vec![root.join("a.js"), root.join("b.js")]);
}

#[tokio::test]
async fn haste_collision_is_fatal_on_build() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "x/Foo.js", "/** @providesModule Foo */\n");
    write(&root, "y/Foo.js", "/** @providesModule Foo */\n");

    let err = DependencyGraph::load(config_at(root)).await;
    match err {
        Err(GraphError::HasteCollision { name, existing, incoming, .. }) => {
            assert_eq!(name, "Foo");
            assert_ne!(existing, incoming);
        }
        other => panic!("expected HasteCollision, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn browser_field_redirect() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "x.js", "require('pkg/a');");
    write(
        &root,
        "pkg/package.json",
        r#"{"name": "pkg", "react-native": {"./a.js": "./b.js"}}"#,
    );
    write(&root, "pkg/a.js", "");
    write(&root, "pkg/b.js", "");

    let graph = graph_at(root.clone()).await;
    let response = graph
        .get_dependencies(&request(&root.join("x.js"), "ios"))
        .await
        .unwrap();

    assert_eq!(
        paths(&response),
        vec![root.join("x.js"), root.join("pkg/b.js")]
    );
}

#[tokio::test]
async fn disabled_module_becomes_null() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "x.js", "require('pkg/a');");
    write(
        &root,
        "pkg/package.json",
        r#"{"name": "pkg", "react-native": {"./a.js": false}}"#,
    );
    write(&root, "pkg/a.js", "");

    let graph = graph_at(root.clone()).await;
    let response = graph
        .get_dependencies(&request(&root.join("x.js"), "ios"))
        .await
        .unwrap();

    assert_eq!(response.dependencies().len(), 2);
    let null = &response.dependencies()[1];
    assert!(matches!(null.kind(), ModuleKind::Null { .. }));
    assert_eq!(null.path(), Path::new("pkg/a"));
    assert_eq!(
        null.read(&Default::default()).await.unwrap().code,
        "module.exports = null;"
    );
}

#[tokio::test]
async fn incremental_invalidation_roundtrip() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "require('./b');");
    write(&root, "b.js", "");

    let graph = graph_at(root.clone()).await;
    let options = request(&root.join("a.js"), "ios");

    let first = graph.get_dependencies(&options).await.unwrap();
    assert_eq!(paths(&first), vec![root.join("a.js"), root.join("b.js")]);

    // Delete b: the next request surfaces the unresolved specifier.
    std::fs::remove_file(root.join("b.js")).unwrap();
    graph
        .process_file_change(ChangeKind::Delete, &root, Path::new("b.js"))
        .await
        .unwrap();

    let broken = graph.get_dependencies(&options).await.unwrap();
    assert_eq!(paths(&broken), vec![root.join("a.js")]);
    assert!(broken
        .errors()
        .iter()
        .any(|e| matches!(e, GraphError::UnableToResolve { specifier, .. } if specifier.as_str() == "./b")));

    // Restore b: the edge comes back.
    write(&root, "b.js", "");
    graph
        .process_file_change(ChangeKind::Add, &root, Path::new("b.js"))
        .await
        .unwrap();

    let restored = graph.get_dependencies(&options).await.unwrap();
    assert_eq!(paths(&restored), vec![root.join("a.js"), root.join("b.js")]);
    assert!(restored.errors().is_empty());
}

#[tokio::test]
async fn cycles_terminate_with_dedup() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "require('./b');");
    write(&root, "b.js", "require('./a');");

    let graph = graph_at(root.clone()).await;
    let response = graph
        .get_dependencies(&request(&root.join("a.js"), "ios"))
        .await
        .unwrap();

    assert_eq!(paths(&response), vec![root.join("a.js"), root.join("b.js")]);
}

#[tokio::test]
async fn emits_depth_first_discovery_order() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    // a → [b, d]; b → [c]; d → [c]. DFS from a: a, b, c, d.
    write(&root, "a.js", "require('./b');\nrequire('./d');");
    write(&root, "b.js", "require('./c');");
    write(&root, "c.js", "");
    write(&root, "d.js", "require('./c');");

    let graph = graph_at(root.clone()).await;
    let response = graph
        .get_dependencies(&request(&root.join("a.js"), "ios"))
        .await
        .unwrap();

    assert_eq!(
        paths(&response),
        vec![
            root.join("a.js"),
            root.join("b.js"),
            root.join("c.js"),
            root.join("d.js"),
        ]
    );
}

#[tokio::test]
async fn inverse_edges_track_forward_edges() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "require('./b');");
    write(&root, "b.js", "");

    let graph = graph_at(root.clone()).await;
    graph
        .get_dependencies(&request(&root.join("a.js"), "ios"))
        .await
        .unwrap();

    let dependers = graph.resolutions().dependers_of(&root.join("b.js"));
    assert!(dependers.contains(&root.join("a.js")));
}

#[tokio::test]
async fn created_events_follow_discovery_order() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "require('./b');");
    write(&root, "b.js", "");

    let graph = graph_at(root.clone()).await;
    let mut events = graph.resolutions().subscribe();

    graph
        .get_dependencies(&request(&root.join("a.js"), "ios"))
        .await
        .unwrap();

    assert_eq!(
        events.try_recv().unwrap(),
        GraphEvent::Created(root.join("a.js"))
    );
    assert_eq!(
        events.try_recv().unwrap(),
        GraphEvent::Created(root.join("b.js"))
    );
}

#[tokio::test]
async fn haste_entry_gets_its_name_as_main_module_id() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "/** @providesModule App */\nrequire('./b');");
    write(&root, "b.js", "");

    let graph = graph_at(root.clone()).await;
    let response = graph
        .get_dependencies(&request(&root.join("a.js"), "ios"))
        .await
        .unwrap();

    assert_eq!(response.main_module_id(), Some("App"));
}

#[tokio::test]
async fn shallow_dependencies_list_specifiers() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "require('./b');\nrequire('lodash');");
    write(&root, "b.js", "");

    let graph = graph_at(root.clone()).await;
    let specifiers = graph
        .get_shallow_dependencies(&root.join("a.js"), &Default::default())
        .await
        .unwrap();

    assert_eq!(specifiers, vec!["./b", "lodash"]);
}

#[tokio::test]
async fn relative_entry_resolves_against_roots() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "src/index.js", "");

    let graph = graph_at(root.clone()).await;
    let response = graph
        .get_dependencies(&request(Path::new("src/index.js"), "ios"))
        .await
        .unwrap();

    assert_eq!(paths(&response), vec![root.join("src/index.js")]);
}

#[tokio::test]
async fn assets_enter_the_graph() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "require('./logo.png');");
    write(&root, "logo.png", "png");

    let graph = graph_at(root.clone()).await;
    let response = graph
        .get_dependencies(&request(&root.join("a.js"), "ios"))
        .await
        .unwrap();

    assert_eq!(response.dependencies().len(), 2);
    assert!(matches!(
        response.dependencies()[1].kind(),
        ModuleKind::Asset
    ));
}

#[tokio::test]
async fn module_identity_is_stable_across_calls() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "");

    let graph = graph_at(root.clone()).await;
    let first = graph.get_module_for_path(&root.join("a.js")).unwrap();
    let second = graph.get_module_for_path(&root.join("a.js")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn unresolved_fails_request_in_strict_mode() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "require('./missing');");

    let graph = graph_at(root.clone()).await;
    let mut options = request(&root.join("a.js"), "ios");
    options.fail_on_unresolved = true;

    let err = graph.get_dependencies(&options).await;
    assert!(matches!(err, Err(GraphError::UnableToResolve { .. })));
}

#[tokio::test]
async fn polyfill_prepending_via_copy() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "");
    write(&root, "polyfill.js", "global.x = 1;");

    let graph = graph_at(root.clone()).await;
    let polyfill = graph.create_polyfill(&root.join("polyfill.js"), "polyfill-global", vec![]);

    let response = graph
        .get_dependencies(&request(&root.join("a.js"), "ios"))
        .await
        .unwrap();
    let copied = response.copy(vec![polyfill]);

    assert_eq!(copied.num_prepended(), 1);
    assert_eq!(
        paths(&copied),
        vec![root.join("polyfill.js"), root.join("a.js")]
    );
    let read = copied.dependencies()[0]
        .read(&Default::default())
        .await
        .unwrap();
    assert_eq!(read.id.as_deref(), Some("polyfill-global"));
    assert_eq!(read.code, "global.x = 1;");
}

#[tokio::test]
async fn change_event_reloads_edited_module() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "require('./b');");
    write(&root, "b.js", "");
    write(&root, "c.js", "");

    let graph = graph_at(root.clone()).await;
    let options = request(&root.join("a.js"), "ios");

    let first = graph.get_dependencies(&options).await.unwrap();
    assert_eq!(paths(&first), vec![root.join("a.js"), root.join("b.js")]);

    // a now requires c instead of b.
    write(&root, "a.js", "require('./c');");
    graph
        .process_file_change(ChangeKind::Change, &root, Path::new("a.js"))
        .await
        .unwrap();

    let second = graph.get_dependencies(&options).await.unwrap();
    assert_eq!(paths(&second), vec![root.join("a.js"), root.join("c.js")]);

    // b's record became garbage once its last depender dropped it.
    assert!(!graph.resolutions().has(&root.join("b.js")));
}

#[tokio::test]
async fn final_state_matches_fresh_build() {
    let dir = tempdir().unwrap();
    let root = normalize_path(dir.path());
    write(&root, "a.js", "require('./b');");
    write(&root, "b.js", "require('./c');");
    write(&root, "c.js", "");

    let graph = graph_at(root.clone()).await;
    let options = request(&root.join("a.js"), "ios");
    graph.get_dependencies(&options).await.unwrap();

    // Mutate the tree through a few events.
    std::fs::remove_file(root.join("c.js")).unwrap();
    graph
        .process_file_change(ChangeKind::Delete, &root, Path::new("c.js"))
        .await
        .unwrap();
    write(&root, "b.js", "");
    graph
        .process_file_change(ChangeKind::Change, &root, Path::new("b.js"))
        .await
        .unwrap();

    let incremental = graph.get_dependencies(&options).await.unwrap();

    // A graph built from scratch over the final tree agrees.
    let fresh = graph_at(root.clone()).await;
    let from_scratch = fresh.get_dependencies(&options).await.unwrap();
    assert_eq!(paths(&incremental), paths(&from_scratch));
}
