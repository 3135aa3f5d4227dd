use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bus::{InMemoryBus, MessageBus};
use crate::permission::PermissionEnforcer;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manifest::ManifestBuilder;
use crate::plugin_system::registry::{PluginInstance, PluginRegistry, PluginState};
use crate::supervisor::tests::fakes::{FakeLauncher, FakeSampler};
use crate::supervisor::{SupervisorConfig, SupervisorContext, SupervisorHandle};

fn instance(name: &str, deps: &[&str]) -> PluginInstance {
    let manifest = deps
        .iter()
        .fold(ManifestBuilder::new(name, "1.0.0"), |builder, dep| builder.dependency(dep))
        .build()
        .unwrap();
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let context = SupervisorContext {
        bus: bus.clone(),
        launcher: Arc::new(FakeLauncher::new(bus)),
        sampler: Arc::new(FakeSampler::default()),
        enforcer: Arc::new(PermissionEnforcer::new()),
    };
    let (events_tx, _events) = mpsc::unbounded_channel();
    let manifest = Arc::new(manifest);
    let handle = SupervisorHandle::spawn(manifest.clone(), SupervisorConfig::default(), context, events_tx);
    PluginInstance::new(manifest, handle)
}

#[test]
fn test_transition_table() {
    use PluginState::*;
    let allowed = [
        (Unloaded, Loaded),
        (Loaded, Starting),
        (Loaded, Blocked),
        (Blocked, Starting),
        (Blocked, Stopped),
        (Starting, Running),
        (Starting, Stopped),
        (Running, Stopping),
        (Running, Crashed),
        (Crashed, Starting),
        (Crashed, Disabled),
        (Stopping, Stopped),
        (Stopped, Starting),
        (Disabled, Starting),
    ];
    for (from, to) in allowed {
        assert!(from.can_transition_to(to), "{} -> {} should be allowed", from, to);
    }

    let forbidden = [
        (Loaded, Running),
        (Running, Starting),
        (Running, Stopped),
        (Stopped, Running),
        (Disabled, Running),
        (Disabled, Stopped),
        (Crashed, Running),
        (Stopping, Running),
    ];
    for (from, to) in forbidden {
        assert!(!from.can_transition_to(to), "{} -> {} should be rejected", from, to);
    }
}

#[test]
fn test_active_states() {
    use PluginState::*;
    for state in [Starting, Running, Stopping, Crashed] {
        assert!(state.is_active(), "{} should be active", state);
    }
    for state in [Unloaded, Loaded, Blocked, Stopped, Disabled] {
        assert!(!state.is_active(), "{} should be inactive", state);
    }
}

#[test]
fn test_state_serializes_uppercase() {
    assert_eq!(serde_json::to_string(&PluginState::Running).unwrap(), "\"RUNNING\"");
    assert_eq!(PluginState::Disabled.to_string(), "DISABLED");
}

#[tokio::test]
async fn test_instance_starts_loaded_and_rejects_invalid_moves() {
    let mut echo = instance("echo", &[]);
    assert_eq!(echo.state, PluginState::Loaded);

    match echo.transition(PluginState::Running) {
        Err(PluginSystemError::InvalidTransition { plugin, from, to }) => {
            assert_eq!(plugin, "echo");
            assert_eq!(from, PluginState::Loaded);
            assert_eq!(to, PluginState::Running);
        }
        other => panic!("expected InvalidTransition, got {:?}", other),
    }
    assert_eq!(echo.state, PluginState::Loaded);

    assert_eq!(echo.transition(PluginState::Starting).unwrap(), PluginState::Loaded);
    echo.transition(PluginState::Running).unwrap();
    let snapshot = echo.snapshot();
    assert_eq!(snapshot.state, PluginState::Running);
    assert_eq!(snapshot.version, "1.0.0");
}

#[tokio::test]
async fn test_registry_dependency_queries() {
    let mut registry = PluginRegistry::new();
    registry.insert(instance("storage", &[]));
    registry.insert(instance("quotes", &["storage"]));
    registry.insert(instance("trivia", &["storage", "quotes"]));

    assert_eq!(registry.len(), 3);
    assert_eq!(registry.names(), vec!["quotes", "storage", "trivia"]);
    assert_eq!(registry.dependents_of("storage"), vec!["quotes", "trivia"]);
    assert_eq!(registry.unmet_dependencies("trivia"), vec!["quotes", "storage"]);

    let storage = registry.get_mut("storage").unwrap();
    storage.transition(PluginState::Starting).unwrap();
    storage.transition(PluginState::Running).unwrap();
    assert_eq!(registry.unmet_dependencies("trivia"), vec!["quotes"]);
    assert!(registry.unmet_dependencies("quotes").is_empty());

    let order = registry.load_order().unwrap();
    assert_eq!(order.order(), vec!["storage", "quotes", "trivia"]);

    let snapshots = registry.snapshots();
    assert_eq!(snapshots.len(), 3);
    assert_eq!(snapshots[2].dependencies, vec!["storage", "quotes"]);

    assert!(registry.remove("trivia").is_some());
    assert!(!registry.contains("trivia"));
}
