use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::bus::{MessageBus, PluginSubjects};
use crate::kernel::constants::{ENV_PLUGIN_NAME, ENV_SUBJECT_PREFIX};
use crate::plugin_system::manifest::PluginManifest;
use crate::supervisor::stdio::StdioBridge;
use crate::supervisor::SupervisorError;

/// How a plugin process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ProcessExit {
    pub fn code(code: i32) -> Self {
        Self { code: Some(code), signal: None }
    }

    pub fn signal(signal: i32) -> Self {
        Self { code: None, signal: Some(signal) }
    }

    pub fn unknown() -> Self {
        Self { code: None, signal: None }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Everything a launcher needs to start one plugin process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub plugin: String,
    pub entry_point: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub memory_limit_mb: u64,
    pub subjects: PluginSubjects,
}

impl LaunchSpec {
    pub fn from_manifest(manifest: &PluginManifest) -> Self {
        Self {
            plugin: manifest.name.clone(),
            entry_point: resolve_entry_point(manifest),
            args: manifest.args.clone(),
            env: manifest.env.clone(),
            memory_limit_mb: manifest.resource_limits.memory_mb,
            subjects: PluginSubjects::new(&manifest.name),
        }
    }
}

/// A relative entry point with a directory component (`./echo`, `bin/echo`)
/// is taken relative to the manifest's own directory. Bare names are left
/// for `PATH` lookup.
fn resolve_entry_point(manifest: &PluginManifest) -> String {
    let entry = Path::new(&manifest.entry_point);
    let has_dir = entry.components().count() > 1;
    match manifest.source.as_deref().and_then(Path::parent) {
        Some(base) if entry.is_relative() && has_dir => base.join(entry).to_string_lossy().into_owned(),
        _ => manifest.entry_point.clone(),
    }
}

/// A running plugin process
#[async_trait]
pub trait PluginProcess: Send + Sync {
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit. Must be cancel safe.
    async fn wait(&mut self) -> ProcessExit;

    /// Force-terminate the process.
    async fn kill(&mut self) -> Result<(), SupervisorError>;
}

/// Spawns isolated plugin processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn PluginProcess>, SupervisorError>;
}

/// Launches plugins as OS processes bridged to the bus over stdio.
pub struct OsProcessLauncher {
    bus: Arc<dyn MessageBus>,
}

impl fmt::Debug for OsProcessLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsProcessLauncher").finish_non_exhaustive()
    }
}

impl OsProcessLauncher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    fn command(spec: &LaunchSpec) -> Command {
        let mut command = Command::new(&spec.entry_point);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .env(ENV_PLUGIN_NAME, &spec.plugin)
            .env(ENV_SUBJECT_PREFIX, spec.subjects.prefix())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        isolate(&mut command, spec.memory_limit_mb);
        command
    }
}

/// New session per plugin, plus an address-space cap on Linux.
#[cfg(unix)]
fn isolate(command: &mut Command, memory_limit_mb: u64) {
    #[cfg(target_os = "linux")]
    let memory_bytes = memory_limit_mb.saturating_mul(1024 * 1024);
    #[cfg(not(target_os = "linux"))]
    let _ = memory_limit_mb;

    // SAFETY: the closure runs in the forked child before exec and only issues
    // async-signal-safe syscalls.
    unsafe {
        command.pre_exec(move || {
            nix::unistd::setsid().map_err(std::io::Error::from)?;
            #[cfg(target_os = "linux")]
            nix::sys::resource::setrlimit(nix::sys::resource::Resource::RLIMIT_AS, memory_bytes, memory_bytes)
                .map_err(std::io::Error::from)?;
            Ok(())
        });
    }
}

#[async_trait]
impl ProcessLauncher for OsProcessLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn PluginProcess>, SupervisorError> {
        let mut child = Self::command(spec).spawn().map_err(|e| SupervisorError::SpawnFailed {
            plugin: spec.plugin.clone(),
            message: format!("{}: {}", spec.entry_point, e),
        })?;
        let pid = child.id();
        log::info!("Spawned plugin '{}' (pid {:?})", spec.plugin, pid);

        let bridge = StdioBridge::attach(&mut child, self.bus.clone(), spec.subjects.clone())
            .await
            .map_err(|e| SupervisorError::Bus {
                plugin: spec.plugin.clone(),
                message: e.to_string(),
            })?;

        Ok(Box::new(OsProcess {
            plugin: spec.plugin.clone(),
            pid,
            child,
            bridge: bridge.into_tasks(),
            exit: None,
        }))
    }
}

struct OsProcess {
    plugin: String,
    pid: Option<u32>,
    child: Child,
    bridge: Vec<JoinHandle<()>>,
    exit: Option<ProcessExit>,
}

#[async_trait]
impl PluginProcess for OsProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> ProcessExit {
        if let Some(exit) = self.exit {
            return exit;
        }
        let exit = match self.child.wait().await {
            Ok(status) => ProcessExit::from(status),
            Err(e) => {
                log::warn!("Failed to wait for plugin '{}': {}", self.plugin, e);
                ProcessExit::unknown()
            }
        };
        self.exit = Some(exit);
        exit
    }

    async fn kill(&mut self) -> Result<(), SupervisorError> {
        if self.exit.is_some() {
            return Ok(());
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // The plugin leads its own session; take down anything it forked too.
            let group = nix::unistd::Pid::from_raw(pid as i32);
            if nix::sys::signal::killpg(group, nix::sys::signal::Signal::SIGKILL).is_ok() {
                return Ok(());
            }
        }
        self.child.start_kill().map_err(|e| SupervisorError::StopFailed {
            plugin: self.plugin.clone(),
            message: e.to_string(),
        })
    }
}

impl Drop for OsProcess {
    fn drop(&mut self) {
        for task in &self.bridge {
            task.abort();
        }
    }
}
