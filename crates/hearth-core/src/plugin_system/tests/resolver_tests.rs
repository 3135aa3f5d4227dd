use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::manifest::{ManifestBuilder, PluginManifest};
use crate::plugin_system::resolver::resolve;

fn plugin(name: &str, version: &str, deps: &[&str]) -> PluginManifest {
    deps.iter()
        .fold(ManifestBuilder::new(name, version), |builder, dep| builder.dependency(dep))
        .build()
        .unwrap()
}

fn layers(order: &crate::plugin_system::resolver::LoadOrder) -> Vec<Vec<&str>> {
    order
        .layers()
        .iter()
        .map(|layer| layer.iter().map(String::as_str).collect())
        .collect()
}

#[test]
fn test_empty_set_resolves_to_nothing() {
    let order = resolve(&[]).unwrap();
    assert!(order.is_empty());
    assert!(order.layers().is_empty());
}

#[test]
fn test_chain_is_layered_dependencies_first() {
    let order = resolve(&[
        plugin("c", "1.0.0", &["b"]),
        plugin("a", "1.0.0", &[]),
        plugin("b", "1.0.0", &["a"]),
    ])
    .unwrap();

    assert_eq!(layers(&order), vec![vec!["a"], vec!["b"], vec!["c"]]);
    assert_eq!(order.order(), vec!["a", "b", "c"]);
    assert_eq!(order.layer_of("c"), Some(2));
    assert_eq!(order.dependencies_of("b"), ["a".to_string()]);
    assert_eq!(order.dependents_of("a"), vec!["b".to_string()]);
}

#[test]
fn test_independent_plugins_share_a_sorted_layer() {
    let order = resolve(&[
        plugin("zeta", "1.0.0", &[]),
        plugin("alpha", "1.0.0", &[]),
        plugin("gateway", "1.0.0", &["zeta", "alpha"]),
        plugin("mid", "1.0.0", &[]),
    ])
    .unwrap();
    assert_eq!(layers(&order), vec![vec!["alpha", "mid", "zeta"], vec!["gateway"]]);
}

#[test]
fn test_resolution_is_independent_of_input_order() {
    let mut manifests = vec![
        plugin("a", "1.0.0", &[]),
        plugin("b", "1.0.0", &["a"]),
        plugin("c", "1.0.0", &["a"]),
        plugin("d", "1.0.0", &["b", "c"]),
    ];
    let forward = resolve(&manifests).unwrap();
    manifests.reverse();
    let backward = resolve(&manifests).unwrap();
    assert_eq!(forward, backward);
    assert_eq!(layers(&forward), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
}

#[test]
fn test_missing_dependency_names_both_ends() {
    let error = resolve(&[plugin("quotes", "1.0.0", &["storage"])]).unwrap_err();
    assert_eq!(
        error,
        DependencyError::MissingDependency {
            plugin: "quotes".to_string(),
            missing: "storage".to_string(),
        }
    );
}

#[test]
fn test_version_mismatch() {
    let error = resolve(&[
        plugin("storage", "2.1.0", &[]),
        plugin("quotes", "1.0.0", &["storage@^1.0"]),
    ])
    .unwrap_err();
    assert_eq!(
        error,
        DependencyError::IncompatibleVersion {
            plugin: "quotes".to_string(),
            dependency: "storage".to_string(),
            required: "^1.0".to_string(),
            found: "2.1.0".to_string(),
        }
    );
}

#[test]
fn test_cycle_reports_exact_members() {
    let error = resolve(&[
        plugin("a", "1.0.0", &["b"]),
        plugin("b", "1.0.0", &["c"]),
        plugin("c", "1.0.0", &["a"]),
        plugin("d", "1.0.0", &["a"]),
    ])
    .unwrap_err();
    assert_eq!(
        error,
        DependencyError::CircularDependency {
            cycle: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        }
    );
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let error = resolve(&[plugin("loop", "1.0.0", &["loop"])]).unwrap_err();
    assert_eq!(
        error,
        DependencyError::CircularDependency {
            cycle: vec!["loop".to_string()],
        }
    );
}

#[test]
fn test_duplicate_names_rejected() {
    let error = resolve(&[plugin("echo", "1.0.0", &[]), plugin("echo", "1.1.0", &[])]).unwrap_err();
    assert_eq!(error, DependencyError::DuplicatePlugin("echo".to_string()));
}

#[test]
fn test_shutdown_layers_put_dependents_first() {
    let order = resolve(&[
        plugin("a", "1.0.0", &[]),
        plugin("b", "1.0.0", &["a"]),
        plugin("c", "1.0.0", &["b"]),
        plugin("x", "1.0.0", &[]),
    ])
    .unwrap();

    let all = order.shutdown_layers(|_| true);
    assert_eq!(
        all,
        vec![
            vec!["c".to_string(), "x".to_string()],
            vec!["b".to_string()],
            vec!["a".to_string()],
        ]
    );

    // Plugins that never started are skipped.
    let partial = order.shutdown_order(|name| name != "c");
    assert_eq!(partial, vec!["b", "x", "a"]);
}

#[test]
fn test_shutdown_layers_follow_chains_through_stopped_plugins() {
    let order = resolve(&[
        plugin("a", "1.0.0", &[]),
        plugin("b", "1.0.0", &["a"]),
        plugin("c", "1.0.0", &["b"]),
    ])
    .unwrap();

    // b is down, but c still reaches a through it.
    let layers = order.shutdown_layers(|name| name != "b");
    assert_eq!(layers, vec![vec!["c".to_string()], vec!["a".to_string()]]);
}
