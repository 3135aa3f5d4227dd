use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::bus::{BusMessage, InMemoryBus, MessageBus, PluginSubjects};
use crate::plugin_system::manifest::ManifestBuilder;
use crate::supervisor::process::{LaunchSpec, OsProcessLauncher, ProcessExit, ProcessLauncher};
use crate::supervisor::SupervisorError;

fn shell_spec(plugin: &str, script: &str) -> LaunchSpec {
    LaunchSpec {
        plugin: plugin.to_string(),
        entry_point: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: BTreeMap::new(),
        memory_limit_mb: 512,
        subjects: PluginSubjects::new(plugin),
    }
}

#[test]
fn test_exit_display() {
    assert_eq!(ProcessExit::code(3).to_string(), "exit code 3");
    assert_eq!(ProcessExit::signal(9).to_string(), "killed by signal 9");
    assert!(ProcessExit::code(0).success());
    assert!(!ProcessExit::unknown().success());
}

#[test]
fn test_relative_entry_point_follows_manifest_dir() {
    let mut manifest = ManifestBuilder::new("echo", "1.0.0").entry_point("./bin/echo").build().unwrap();
    assert_eq!(LaunchSpec::from_manifest(&manifest).entry_point, "./bin/echo");

    manifest.source = Some(PathBuf::from("/srv/plugins/echo/manifest.json"));
    let spec = LaunchSpec::from_manifest(&manifest);
    assert_eq!(Path::new(&spec.entry_point), Path::new("/srv/plugins/echo/./bin/echo"));
    assert_eq!(spec.subjects.prefix(), "plugin.echo");

    // Bare names are looked up on PATH.
    manifest.entry_point = "python3".to_string();
    assert_eq!(LaunchSpec::from_manifest(&manifest).entry_point, "python3");
}

#[tokio::test]
async fn test_missing_binary_is_spawn_failure() {
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let launcher = OsProcessLauncher::new(bus);
    let mut spec = shell_spec("ghost", "");
    spec.entry_point = "/nonexistent/hearth-plugin".to_string();

    let err = launcher.spawn(&spec).await.err().unwrap();
    assert!(matches!(err, SupervisorError::SpawnFailed { ref plugin, .. } if plugin == "ghost"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_stdio_bridge_handshake_and_shutdown() {
    let bus = InMemoryBus::new();
    let shared: Arc<dyn MessageBus> = Arc::new(bus.clone());
    let launcher = OsProcessLauncher::new(shared);

    let mut ready = bus.subscribe("plugin.shy.ready").await.unwrap();
    let mut leaked = bus.subscribe("chat.outbound.>").await.unwrap();

    // Tries to escape its namespace, then announces itself and waits for stdin.
    let script = r#"
        echo '{"subject":"chat.outbound.general","payload":"hi"}'
        echo "{\"subject\":\"plugin.shy.ready\",\"payload\":{\"name\":\"$HEARTH_PLUGIN\"}}"
        read line
        exit 0
    "#;
    let mut process = launcher.spawn(&shell_spec("shy", script)).await.unwrap();
    assert!(process.id().is_some());

    let announced = tokio::time::timeout(Duration::from_secs(5), ready.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(announced.payload["name"], "shy");
    assert!(leaked.try_next().is_none());

    bus.publish(BusMessage::new("plugin.shy.control", json!({"command": "shutdown"})))
        .await
        .unwrap();
    let exit = tokio::time::timeout(Duration::from_secs(5), process.wait()).await.unwrap();
    assert_eq!(exit, ProcessExit::code(0));
}

#[cfg(unix)]
#[tokio::test]
async fn test_kill_terminates_process() {
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let launcher = OsProcessLauncher::new(bus);
    let mut process = launcher.spawn(&shell_spec("sleepy", "sleep 30")).await.unwrap();

    process.kill().await.unwrap();
    let exit = tokio::time::timeout(Duration::from_secs(5), process.wait()).await.unwrap();
    assert!(!exit.success());
    // Waiting again returns the cached status.
    assert_eq!(process.wait().await, exit);
}
