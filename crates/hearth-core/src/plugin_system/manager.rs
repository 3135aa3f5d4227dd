//! # Plugin Manager
//!
//! The manager owns the [`PluginRegistry`] inside a single control loop task.
//! Every mutation (load, unload, start, stop, grants) is a [`ManagerCommand`]
//! queued to that loop, so concurrent callers never race on plugin state.
//! Supervisor reports are consumed by the same loop, ahead of queued commands.
//!
//! Readers get immutable [`PluginSnapshot`]s from a watch channel and never
//! wait behind the command queue.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::{ManagerSettings, SupervisorSettings};
use crate::event::{EventNotifier, LifecycleEvent, SharedEventDispatcher};
use crate::permission::{AuditLog, Capability, Decision, PermissionEnforcer, PermissionGrant};
use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::registry::{PluginInstance, PluginRegistry, PluginSnapshot, PluginState};
use crate::plugin_system::resolver::resolve;
use crate::supervisor::{
    StopOutcome, SupervisorConfig, SupervisorContext, SupervisorError, SupervisorEvent, SupervisorHandle,
};

/// Per-plugin result of a start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { pid: Option<u32> },
    AlreadyRunning,
    Failed { error: String },
    /// A dependency is not RUNNING; the plugin was not spawned
    Blocked { waiting_on: Vec<String> },
    /// Restart budget exhausted; only an explicit restart revives it
    Disabled,
}

impl StartOutcome {
    /// Whether the plugin is RUNNING after this outcome
    pub fn is_running(&self) -> bool {
        matches!(self, StartOutcome::Started { .. } | StartOutcome::AlreadyRunning)
    }
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Started { pid: Some(pid) } => write!(f, "started (pid {})", pid),
            StartOutcome::Started { pid: None } => f.write_str("started"),
            StartOutcome::AlreadyRunning => f.write_str("already running"),
            StartOutcome::Failed { error } => write!(f, "failed: {}", error),
            StartOutcome::Blocked { waiting_on } => write!(f, "blocked on {}", waiting_on.join(", ")),
            StartOutcome::Disabled => f.write_str("disabled"),
        }
    }
}

/// Per-plugin result of a stop request
pub type StopResult = Result<StopOutcome, String>;

pub type LoadResults = BTreeMap<String, Result<(), PluginSystemError>>;

type Reply<T> = oneshot::Sender<T>;

enum ManagerCommand {
    Load {
        manifest: PluginManifest,
        reply: Reply<Result<(), PluginSystemError>>,
    },
    LoadMany {
        manifests: Vec<PluginManifest>,
        reply: Reply<LoadResults>,
    },
    Replace {
        manifest: PluginManifest,
        reply: Reply<Result<(), PluginSystemError>>,
    },
    Unload {
        name: String,
        reply: Reply<Result<(), PluginSystemError>>,
    },
    StartAll {
        reply: Reply<BTreeMap<String, StartOutcome>>,
    },
    StopAll {
        reply: Reply<BTreeMap<String, StopResult>>,
    },
    Start {
        name: String,
        reply: Reply<Result<StartOutcome, PluginSystemError>>,
    },
    Stop {
        name: String,
        reply: Reply<Result<StopOutcome, PluginSystemError>>,
    },
    Restart {
        name: String,
        reply: Reply<Result<StartOutcome, PluginSystemError>>,
    },
    Grant {
        plugin: String,
        capability: Capability,
        granted_by: String,
        expires_at: Option<DateTime<Utc>>,
        reply: Reply<Result<PermissionGrant, PluginSystemError>>,
    },
    Revoke {
        plugin: String,
        capability: Capability,
        reply: Reply<Result<(), PluginSystemError>>,
    },
    Shutdown {
        reply: Reply<BTreeMap<String, StopResult>>,
    },
}

/// Cloneable handle to the manager's control loop
#[derive(Clone)]
pub struct PluginManager {
    commands: mpsc::Sender<ManagerCommand>,
    snapshots: watch::Receiver<Vec<PluginSnapshot>>,
    enforcer: Arc<PermissionEnforcer>,
    observers: SharedEventDispatcher,
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.snapshots.borrow().len())
            .finish_non_exhaustive()
    }
}

impl PluginManager {
    /// Start the control loop and the lifecycle notifier.
    pub fn spawn(
        settings: ManagerSettings,
        supervisor_settings: SupervisorSettings,
        context: SupervisorContext,
    ) -> (Self, JoinHandle<()>) {
        let observers = SharedEventDispatcher::new();
        let (notifier, _notifier_task) = EventNotifier::spawn(observers.clone(), context.bus.clone());
        let (command_tx, command_rx) = mpsc::channel(settings.command_queue_depth.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(Vec::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let enforcer = context.enforcer.clone();

        let control = ControlLoop {
            registry: PluginRegistry::new(),
            settings,
            supervisor_settings,
            context,
            notifier,
            snapshots: snapshot_tx,
            events_tx,
            events: events_rx,
            commands: command_rx,
        };
        let task = tokio::spawn(control.run());

        let manager = Self {
            commands: command_tx,
            snapshots: snapshot_rx,
            enforcer,
            observers,
        };
        (manager, task)
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> ManagerCommand) -> Result<T, PluginSystemError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| PluginSystemError::ManagerUnavailable)?;
        response.await.map_err(|_| PluginSystemError::ManagerUnavailable)
    }

    /// Validate a manifest against the current graph and register it as LOADED.
    pub async fn load(&self, manifest: PluginManifest) -> Result<(), PluginSystemError> {
        self.request(|reply| ManagerCommand::Load { manifest, reply }).await?
    }

    /// Load a batch in dependency-satisfying passes; batch order does not matter.
    pub async fn load_many(&self, manifests: Vec<PluginManifest>) -> Result<LoadResults, PluginSystemError> {
        self.request(|reply| ManagerCommand::LoadMany { manifests, reply }).await
    }

    /// Swap a loaded plugin's manifest, stopping the old instance first.
    pub async fn replace(&self, manifest: PluginManifest) -> Result<(), PluginSystemError> {
        self.request(|reply| ManagerCommand::Replace { manifest, reply }).await?
    }

    pub async fn unload(&self, name: &str) -> Result<(), PluginSystemError> {
        let name = name.to_string();
        self.request(|reply| ManagerCommand::Unload { name, reply }).await?
    }

    /// Start every loaded plugin, layer by layer.
    pub async fn start_all(&self) -> Result<BTreeMap<String, StartOutcome>, PluginSystemError> {
        self.request(|reply| ManagerCommand::StartAll { reply }).await
    }

    /// Stop every active plugin, dependents first. Best effort.
    pub async fn stop_all(&self) -> Result<BTreeMap<String, StopResult>, PluginSystemError> {
        self.request(|reply| ManagerCommand::StopAll { reply }).await
    }

    pub async fn start(&self, name: &str) -> Result<StartOutcome, PluginSystemError> {
        let name = name.to_string();
        self.request(|reply| ManagerCommand::Start { name, reply }).await?
    }

    pub async fn stop(&self, name: &str) -> Result<StopOutcome, PluginSystemError> {
        let name = name.to_string();
        self.request(|reply| ManagerCommand::Stop { name, reply }).await?
    }

    /// Stop then start one plugin. Dependents are left running. This is also
    /// the only way to revive a DISABLED plugin.
    pub async fn restart(&self, name: &str) -> Result<StartOutcome, PluginSystemError> {
        let name = name.to_string();
        self.request(|reply| ManagerCommand::Restart { name, reply }).await?
    }

    pub async fn grant(
        &self,
        plugin: &str,
        capability: Capability,
        granted_by: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<PermissionGrant, PluginSystemError> {
        let plugin = plugin.to_string();
        let granted_by = granted_by.to_string();
        self.request(|reply| ManagerCommand::Grant {
            plugin,
            capability,
            granted_by,
            expires_at,
            reply,
        })
        .await?
    }

    pub async fn revoke(&self, plugin: &str, capability: Capability) -> Result<(), PluginSystemError> {
        let plugin = plugin.to_string();
        self.request(|reply| ManagerCommand::Revoke {
            plugin,
            capability,
            reply,
        })
        .await?
    }

    /// Authorize one capability use directly against the enforcer.
    pub fn check(&self, plugin: &str, capability: &Capability) -> Decision {
        self.enforcer.check(plugin, capability)
    }

    pub fn audit_log(&self) -> Arc<AuditLog> {
        self.enforcer.audit_log().clone()
    }

    pub fn enforcer(&self) -> &Arc<PermissionEnforcer> {
        &self.enforcer
    }

    /// Snapshot of every loaded plugin, sorted by name
    pub fn status(&self) -> Vec<PluginSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn snapshot(&self, name: &str) -> Option<PluginSnapshot> {
        self.snapshots.borrow().iter().find(|snapshot| snapshot.name == name).cloned()
    }

    /// Receiver notified on every registry change
    pub fn watch_status(&self) -> watch::Receiver<Vec<PluginSnapshot>> {
        self.snapshots.clone()
    }

    /// Registry of lifecycle observers
    pub fn observers(&self) -> &SharedEventDispatcher {
        &self.observers
    }

    /// Stop every plugin and end the control loop.
    pub async fn shutdown(&self) -> Result<BTreeMap<String, StopResult>, PluginSystemError> {
        self.request(|reply| ManagerCommand::Shutdown { reply }).await
    }
}

struct ControlLoop {
    registry: PluginRegistry,
    settings: ManagerSettings,
    supervisor_settings: SupervisorSettings,
    context: SupervisorContext,
    notifier: EventNotifier,
    snapshots: watch::Sender<Vec<PluginSnapshot>>,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    events: mpsc::UnboundedReceiver<SupervisorEvent>,
    commands: mpsc::Receiver<ManagerCommand>,
}

impl ControlLoop {
    async fn run(mut self) {
        log::debug!("Plugin manager control loop started");
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => self.on_supervisor_event(event).await,
                command = self.commands.recv() => match command {
                    Some(ManagerCommand::Shutdown { reply }) => {
                        let results = self.stop_all().await;
                        let _ = reply.send(results);
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.stop_all().await;
                        break;
                    }
                },
            }
        }
        for instance in self.registry.iter() {
            instance.supervisor.shutdown();
        }
        log::info!("Plugin manager stopped");
    }

    async fn handle(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Load { manifest, reply } => {
                let _ = reply.send(self.load(manifest));
            }
            ManagerCommand::LoadMany { manifests, reply } => {
                let _ = reply.send(self.load_many(manifests));
            }
            ManagerCommand::Replace { manifest, reply } => {
                let result = self.replace(manifest).await;
                let _ = reply.send(result);
            }
            ManagerCommand::Unload { name, reply } => {
                let result = self.unload(&name).await;
                let _ = reply.send(result);
            }
            ManagerCommand::StartAll { reply } => {
                let outcomes = self.start_all().await;
                let _ = reply.send(outcomes);
            }
            ManagerCommand::StopAll { reply } => {
                let results = self.stop_all().await;
                let _ = reply.send(results);
            }
            ManagerCommand::Start { name, reply } => {
                let result = self.start(&name, false).await;
                let _ = reply.send(result);
            }
            ManagerCommand::Stop { name, reply } => {
                let result = self.stop(&name).await;
                let _ = reply.send(result);
            }
            ManagerCommand::Restart { name, reply } => {
                let result = match self.stop(&name).await {
                    Ok(_) => self.start(&name, true).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            ManagerCommand::Grant {
                plugin,
                capability,
                granted_by,
                expires_at,
                reply,
            } => {
                let result = self
                    .context
                    .enforcer
                    .grant(&plugin, &capability, &granted_by, expires_at)
                    .map_err(PluginSystemError::from);
                self.refresh_capabilities(&plugin);
                let _ = reply.send(result);
            }
            ManagerCommand::Revoke {
                plugin,
                capability,
                reply,
            } => {
                let result = self
                    .context
                    .enforcer
                    .revoke(&plugin, &capability)
                    .map_err(PluginSystemError::from);
                self.refresh_capabilities(&plugin);
                let _ = reply.send(result);
            }
            // Handled by the loop itself
            ManagerCommand::Shutdown { .. } => {}
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.registry.snapshots());
    }

    fn emit(&self, event: LifecycleEvent) {
        self.notifier.emit(event);
    }

    /// Move `name` to `next` if the lifecycle allows it.
    fn transition(&mut self, name: &str, next: PluginState) -> bool {
        let Some(instance) = self.registry.get_mut(name) else {
            return false;
        };
        match instance.transition(next) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("Ignoring transition: {}", e);
                false
            }
        }
    }

    fn refresh_capabilities(&mut self, name: &str) {
        let effective = self.context.enforcer.effective_capabilities(name);
        if let Some(instance) = self.registry.get_mut(name) {
            instance.granted_capabilities = effective;
            self.publish();
        }
    }

    fn spawn_supervisor(&self, manifest: &Arc<PluginManifest>) -> SupervisorHandle {
        let config = SupervisorConfig::for_manifest(&self.supervisor_settings, manifest);
        SupervisorHandle::spawn(manifest.clone(), config, self.context.clone(), self.events_tx.clone())
    }

    fn load(&mut self, manifest: PluginManifest) -> Result<(), PluginSystemError> {
        if let Some(existing) = self.registry.get(&manifest.name) {
            return Err(PluginSystemError::AlreadyLoaded {
                plugin: manifest.name.clone(),
                version: existing.manifest.version.to_string(),
            });
        }
        manifest.validate()?;
        let mut manifests = self.registry.manifests();
        manifests.push(manifest.clone());
        resolve(&manifests)?;
        self.context
            .enforcer
            .register(&manifest.name, manifest.profile, &manifest.declared_capabilities)?;

        let manifest = Arc::new(manifest);
        let mut instance = PluginInstance::new(manifest.clone(), self.spawn_supervisor(&manifest));
        instance.granted_capabilities = self.context.enforcer.effective_capabilities(&manifest.name);
        self.registry.insert(instance);

        log::info!("Loaded plugin '{}' {}", manifest.name, manifest.version);
        self.emit(LifecycleEvent::Loaded {
            plugin: manifest.name.clone(),
            version: manifest.version.to_string(),
        });
        self.publish();
        Ok(())
    }

    fn load_many(&mut self, manifests: Vec<PluginManifest>) -> LoadResults {
        let mut results = LoadResults::new();
        let mut pending = manifests;
        loop {
            let pending_names: Vec<String> = pending.iter().map(|m| m.name.clone()).collect();
            let mut deferred = Vec::new();
            let mut progressed = false;
            for manifest in pending {
                let name = manifest.name.clone();
                match self.load(manifest.clone()) {
                    Ok(()) => {
                        progressed = true;
                        results.insert(name, Ok(()));
                    }
                    // The dependency may still arrive later in this batch.
                    Err(PluginSystemError::Dependency(DependencyError::MissingDependency { ref missing, .. }))
                        if pending_names.contains(missing) && missing != &name =>
                    {
                        deferred.push(manifest);
                    }
                    Err(e) => {
                        results.insert(name, Err(e));
                    }
                }
            }
            if deferred.is_empty() {
                break;
            }
            if !progressed {
                for manifest in deferred {
                    let name = manifest.name.clone();
                    let result = self.load(manifest);
                    results.insert(name, result);
                }
                break;
            }
            pending = deferred;
        }
        results
    }

    async fn replace(&mut self, manifest: PluginManifest) -> Result<(), PluginSystemError> {
        let name = manifest.name.clone();
        if !self.registry.contains(&name) {
            return Err(PluginSystemError::NotLoaded(name));
        }
        manifest.validate()?;
        let mut manifests: Vec<PluginManifest> = self
            .registry
            .manifests()
            .into_iter()
            .filter(|loaded| loaded.name != name)
            .collect();
        manifests.push(manifest.clone());
        resolve(&manifests)?;
        self.context
            .enforcer
            .update_registration(&name, manifest.profile, &manifest.declared_capabilities)?;

        if let Err(e) = self.stop(&name).await {
            log::warn!("Stopping '{}' before replace failed: {}", name, e);
        }
        if let Some(old) = self.registry.remove(&name) {
            old.supervisor.shutdown();
            log::info!("Replacing plugin '{}' {} with {}", name, old.manifest.version, manifest.version);
        }

        let manifest = Arc::new(manifest);
        let mut instance = PluginInstance::new(manifest.clone(), self.spawn_supervisor(&manifest));
        instance.granted_capabilities = self.context.enforcer.effective_capabilities(&name);
        self.registry.insert(instance);
        self.emit(LifecycleEvent::Loaded {
            plugin: name,
            version: manifest.version.to_string(),
        });
        self.publish();
        Ok(())
    }

    async fn unload(&mut self, name: &str) -> Result<(), PluginSystemError> {
        if !self.registry.contains(name) {
            return Err(PluginSystemError::NotLoaded(name.to_string()));
        }
        let dependents = self.registry.dependents_of(name);
        if !dependents.is_empty() {
            return Err(PluginSystemError::HasDependents {
                plugin: name.to_string(),
                dependents,
            });
        }
        if let Err(e) = self.stop(name).await {
            log::warn!("Stopping '{}' before unload failed: {}", name, e);
        }
        if let Some(instance) = self.registry.remove(name) {
            instance.supervisor.shutdown();
        }
        self.context.enforcer.unregister(name)?;
        log::info!("Unloaded plugin '{}'", name);
        self.emit(LifecycleEvent::Unloaded {
            plugin: name.to_string(),
        });
        self.publish();
        Ok(())
    }

    /// Handle every supervisor report already queued.
    async fn drain_supervisor_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.on_supervisor_event(event).await;
        }
    }

    async fn start_all(&mut self) -> BTreeMap<String, StartOutcome> {
        let mut outcomes = BTreeMap::new();
        let order = match self.registry.load_order() {
            Ok(order) => order,
            Err(e) => {
                log::error!("Cannot order loaded plugins: {}", e);
                for name in self.registry.names() {
                    outcomes.insert(name, StartOutcome::Failed { error: e.to_string() });
                }
                return outcomes;
            }
        };

        for layer in order.layers() {
            self.drain_supervisor_events().await;
            let mut admitted = Vec::new();
            for name in layer {
                match self.admit(name, false) {
                    Ok(handle) => admitted.push((name.clone(), handle)),
                    Err(outcome) => {
                        outcomes.insert(name.clone(), outcome);
                    }
                }
            }
            self.publish();
            outcomes.extend(self.start_batch(admitted).await);
        }

        let started = outcomes.values().filter(|o| matches!(o, StartOutcome::Started { .. })).count();
        log::info!("start_all: {} of {} plugin(s) started", started, outcomes.len());
        outcomes
    }

    /// Decide whether `name` may start now. On admission the plugin is moved
    /// to STARTING and its supervisor handle returned.
    fn admit(&mut self, name: &str, revive: bool) -> Result<SupervisorHandle, StartOutcome> {
        let Some(state) = self.registry.state_of(name) else {
            return Err(StartOutcome::Failed {
                error: format!("plugin '{}' is not loaded", name),
            });
        };
        match state {
            PluginState::Running => return Err(StartOutcome::AlreadyRunning),
            PluginState::Disabled if !revive => return Err(StartOutcome::Disabled),
            PluginState::Starting | PluginState::Stopping => {
                return Err(StartOutcome::Failed {
                    error: format!("plugin '{}' is {}", name, state),
                });
            }
            _ => {}
        }

        let waiting_on = self.registry.unmet_dependencies(name);
        if !waiting_on.is_empty() {
            if state != PluginState::Blocked && self.transition(name, PluginState::Blocked) {
                log::info!("Plugin '{}' is blocked on {}", name, waiting_on.join(", "));
                self.emit(LifecycleEvent::Blocked {
                    plugin: name.to_string(),
                    waiting_on: waiting_on.clone(),
                });
            }
            return Err(StartOutcome::Blocked { waiting_on });
        }

        if !self.transition(name, PluginState::Starting) {
            return Err(StartOutcome::Failed {
                error: format!("plugin '{}' cannot start from {}", name, state),
            });
        }
        match self.registry.get(name) {
            Some(instance) => Ok(instance.supervisor.clone()),
            None => Err(StartOutcome::Failed {
                error: format!("plugin '{}' is not loaded", name),
            }),
        }
    }

    /// Start admitted plugins with bounded parallelism and record the results.
    async fn start_batch(&mut self, admitted: Vec<(String, SupervisorHandle)>) -> BTreeMap<String, StartOutcome> {
        let results: Vec<(String, Result<Option<u32>, SupervisorError>)> = stream::iter(admitted)
            .map(|(name, handle)| async move {
                let result = handle.start().await;
                (name, result)
            })
            .buffer_unordered(self.settings.max_parallel_starts.max(1))
            .collect()
            .await;

        let mut outcomes = BTreeMap::new();
        for (name, result) in results {
            let outcome = self.finish_start(&name, result);
            outcomes.insert(name, outcome);
        }
        self.publish();
        outcomes
    }

    fn finish_start(&mut self, name: &str, result: Result<Option<u32>, SupervisorError>) -> StartOutcome {
        match result {
            Ok(pid) => {
                self.transition(name, PluginState::Running);
                if let Some(instance) = self.registry.get_mut(name) {
                    let status = instance.supervisor.status();
                    instance.process_id = pid;
                    instance.started_at = status.started_at.or_else(|| Some(Utc::now()));
                    instance.restart_count = status.restart_count;
                    instance.last_error = None;
                }
                self.emit(LifecycleEvent::Started {
                    plugin: name.to_string(),
                    pid,
                });
                StartOutcome::Started { pid }
            }
            Err(error @ SupervisorError::Busy { .. }) => StartOutcome::Failed {
                error: error.to_string(),
            },
            Err(error) => {
                self.transition(name, PluginState::Stopped);
                let message = error.to_string();
                if let Some(instance) = self.registry.get_mut(name) {
                    instance.process_id = None;
                    instance.last_error = Some(message.clone());
                }
                self.emit(LifecycleEvent::Stopped {
                    plugin: name.to_string(),
                    error: Some(message.clone()),
                });
                StartOutcome::Failed { error: message }
            }
        }
    }

    async fn start(&mut self, name: &str, revive: bool) -> Result<StartOutcome, PluginSystemError> {
        if !self.registry.contains(name) {
            return Err(PluginSystemError::NotLoaded(name.to_string()));
        }
        let outcome = match self.admit(name, revive) {
            Ok(handle) => {
                self.publish();
                let mut outcomes = self.start_batch(vec![(name.to_string(), handle)]).await;
                outcomes.remove(name).unwrap_or(StartOutcome::Failed {
                    error: "start produced no result".to_string(),
                })
            }
            Err(outcome) => outcome,
        };
        self.publish();
        if matches!(outcome, StartOutcome::Started { .. }) {
            self.retry_blocked().await;
        }
        Ok(outcome)
    }

    /// Start BLOCKED plugins whose dependencies are all RUNNING now, until
    /// nothing more unblocks.
    async fn retry_blocked(&mut self) {
        let Ok(order) = self.registry.load_order() else {
            return;
        };
        loop {
            let ready: Vec<String> = order
                .order()
                .into_iter()
                .filter(|name| self.registry.state_of(name) == Some(PluginState::Blocked))
                .filter(|name| self.registry.unmet_dependencies(name).is_empty())
                .collect();
            if ready.is_empty() {
                break;
            }
            log::info!("Retrying unblocked plugin(s): {}", ready.join(", "));
            let mut admitted = Vec::new();
            for name in &ready {
                if let Ok(handle) = self.admit(name, false) {
                    admitted.push((name.clone(), handle));
                }
            }
            let outcomes = self.start_batch(admitted).await;
            if !outcomes.values().any(|outcome| matches!(outcome, StartOutcome::Started { .. })) {
                break;
            }
        }
    }

    async fn stop_all(&mut self) -> BTreeMap<String, StopResult> {
        self.drain_supervisor_events().await;
        let mut results = BTreeMap::new();

        let layers = match self.registry.load_order() {
            Ok(order) => order.shutdown_layers(|name| self.registry.state_of(name).is_some_and(|s| s.is_active())),
            Err(e) => {
                log::error!("Cannot order loaded plugins, stopping all at once: {}", e);
                let active: Vec<String> = self
                    .registry
                    .iter()
                    .filter(|instance| instance.state.is_active())
                    .map(|instance| instance.name().to_string())
                    .collect();
                vec![active]
            }
        };

        for layer in layers {
            let mut stopping = Vec::new();
            for name in &layer {
                if self.transition(name, PluginState::Stopping) {
                    if let Some(instance) = self.registry.get(name) {
                        stopping.push((name.clone(), instance.supervisor.clone()));
                    }
                }
            }
            self.publish();
            let stopped: Vec<(String, Result<StopOutcome, SupervisorError>)> = stream::iter(stopping)
                .map(|(name, handle)| async move {
                    let result = handle.stop().await;
                    (name, result)
                })
                .buffer_unordered(self.settings.max_parallel_starts.max(1))
                .collect()
                .await;
            for (name, result) in stopped {
                let result = self.finish_stop(&name, result).map_err(|e| e.to_string());
                results.insert(name, result);
            }
            self.publish();
        }

        for name in self.registry.names() {
            if results.contains_key(&name) {
                continue;
            }
            if self.registry.state_of(&name) == Some(PluginState::Blocked) {
                self.transition(&name, PluginState::Stopped);
            }
            results.insert(name, Ok(StopOutcome::AlreadyStopped));
        }
        self.publish();
        results
    }

    fn finish_stop(
        &mut self,
        name: &str,
        result: Result<StopOutcome, SupervisorError>,
    ) -> Result<StopOutcome, SupervisorError> {
        self.transition(name, PluginState::Stopped);
        if let Some(instance) = self.registry.get_mut(name) {
            instance.process_id = None;
            if let Err(e) = &result {
                instance.last_error = Some(e.to_string());
            }
        }
        self.emit(LifecycleEvent::Stopped {
            plugin: name.to_string(),
            error: result.as_ref().err().map(|e| e.to_string()),
        });
        result
    }

    async fn stop(&mut self, name: &str) -> Result<StopOutcome, PluginSystemError> {
        let Some(state) = self.registry.state_of(name) else {
            return Err(PluginSystemError::NotLoaded(name.to_string()));
        };
        if state == PluginState::Blocked {
            self.transition(name, PluginState::Stopped);
            self.publish();
            return Ok(StopOutcome::AlreadyStopped);
        }
        if !state.is_active() || !self.transition(name, PluginState::Stopping) {
            return Ok(StopOutcome::AlreadyStopped);
        }
        self.publish();

        let handle = match self.registry.get(name) {
            Some(instance) => instance.supervisor.clone(),
            None => return Err(PluginSystemError::NotLoaded(name.to_string())),
        };
        let result = handle.stop().await;
        let result = self.finish_stop(name, result);
        self.publish();
        result.map_err(|source| PluginSystemError::Supervisor {
            plugin: name.to_string(),
            source,
        })
    }

    async fn on_supervisor_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Crashed {
                plugin,
                error,
                restart_count,
            } => {
                if self.registry.state_of(&plugin) != Some(PluginState::Running)
                    || !self.transition(&plugin, PluginState::Crashed)
                {
                    return;
                }
                if let Some(instance) = self.registry.get_mut(&plugin) {
                    instance.process_id = None;
                    instance.restart_count = restart_count;
                    instance.last_error = Some(error.to_string());
                }
                self.emit(LifecycleEvent::Crashed {
                    plugin,
                    error: error.to_string(),
                    restart_count,
                });
            }
            SupervisorEvent::Restarting { plugin, attempt, delay } => {
                if self.registry.state_of(&plugin) != Some(PluginState::Crashed)
                    || !self.transition(&plugin, PluginState::Starting)
                {
                    return;
                }
                log::info!("Restarting '{}' (attempt {}, after {:?})", plugin, attempt, delay);
                if let Some(instance) = self.registry.get_mut(&plugin) {
                    instance.restart_count = attempt;
                }
            }
            SupervisorEvent::Restarted { plugin, pid } => {
                if self.registry.state_of(&plugin) != Some(PluginState::Starting) {
                    return;
                }
                self.finish_start(&plugin, Ok(pid));
                self.publish();
                self.retry_blocked().await;
            }
            SupervisorEvent::RestartFailed { plugin, error } => {
                if self.registry.state_of(&plugin) != Some(PluginState::Starting) {
                    return;
                }
                self.finish_start(&plugin, Err(error));
            }
            SupervisorEvent::Disabled { plugin, error } => {
                if self.registry.state_of(&plugin) != Some(PluginState::Crashed)
                    || !self.transition(&plugin, PluginState::Disabled)
                {
                    return;
                }
                if let Some(instance) = self.registry.get_mut(&plugin) {
                    instance.last_error = Some(error.to_string());
                }
                self.emit(LifecycleEvent::Disabled {
                    plugin,
                    error: Some(error.to_string()),
                });
            }
            SupervisorEvent::PermissionDenied {
                plugin,
                capability,
                subject,
            } => {
                self.emit(LifecycleEvent::PermissionDenied {
                    plugin,
                    capability,
                    subject,
                });
                return;
            }
            SupervisorEvent::ResourceSample { plugin, usage } => {
                log::trace!("{}: cpu {:.1}% mem {}MB", plugin, usage.cpu_percent, usage.memory_mb);
                return;
            }
        }
        self.publish();
    }
}
