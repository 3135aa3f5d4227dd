use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permission::{Capability, Profile};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::resolver::{resolve, LoadOrder};
use crate::supervisor::SupervisorHandle;

/// Lifecycle state of a plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    Unloaded,
    Loaded,
    Blocked,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
    Disabled,
}

impl PluginState {
    /// Whether the plugin owns (or is about to own) a live process
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PluginState::Starting | PluginState::Running | PluginState::Stopping | PluginState::Crashed
        )
    }

    pub fn can_transition_to(&self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Unloaded, Loaded)
                | (Loaded | Stopped | Blocked, Starting)
                | (Loaded | Stopped | Blocked, Blocked)
                | (Blocked, Stopped)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Crashed)
                | (Crashed, Starting)
                | (Crashed, Disabled)
                | (Crashed, Stopping)
                | (Stopping, Stopped)
                | (Disabled, Starting)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Unloaded => "UNLOADED",
            PluginState::Loaded => "LOADED",
            PluginState::Blocked => "BLOCKED",
            PluginState::Starting => "STARTING",
            PluginState::Running => "RUNNING",
            PluginState::Stopping => "STOPPING",
            PluginState::Stopped => "STOPPED",
            PluginState::Crashed => "CRASHED",
            PluginState::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One loaded plugin: its manifest, supervisor handle and observed lifecycle.
#[derive(Debug)]
pub struct PluginInstance {
    pub manifest: Arc<PluginManifest>,
    pub supervisor: SupervisorHandle,
    pub state: PluginState,
    pub process_id: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_error: Option<String>,
    /// Effective capability set as of the last refresh
    pub granted_capabilities: BTreeSet<Capability>,
}

impl PluginInstance {
    pub fn new(manifest: Arc<PluginManifest>, supervisor: SupervisorHandle) -> Self {
        Self {
            manifest,
            supervisor,
            state: PluginState::Loaded,
            process_id: None,
            started_at: None,
            restart_count: 0,
            last_error: None,
            granted_capabilities: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Move to `next`, rejecting moves the lifecycle does not allow.
    pub fn transition(&mut self, next: PluginState) -> Result<PluginState, PluginSystemError> {
        if !self.state.can_transition_to(next) {
            return Err(PluginSystemError::InvalidTransition {
                plugin: self.manifest.name.clone(),
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        log::debug!("Plugin '{}': {} -> {}", self.manifest.name, previous, next);
        Ok(previous)
    }

    pub fn snapshot(&self) -> PluginSnapshot {
        PluginSnapshot {
            name: self.manifest.name.clone(),
            version: self.manifest.version.to_string(),
            state: self.state,
            process_id: self.process_id,
            started_at: self.started_at,
            restart_count: self.restart_count,
            last_error: self.last_error.clone(),
            profile: self.manifest.profile,
            granted_capabilities: self.granted_capabilities.clone(),
            dependencies: self.manifest.dependency_names().map(str::to_string).collect(),
        }
    }
}

/// Immutable view of a plugin handed to readers outside the control loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSnapshot {
    pub name: String,
    pub version: String,
    pub state: PluginState,
    pub process_id: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_error: Option<String>,
    pub profile: Profile,
    pub granted_capabilities: BTreeSet<Capability>,
    pub dependencies: Vec<String>,
}

/// Registry of loaded plugins. Owned by the manager's control loop, which is
/// its only writer.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, PluginInstance>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instance: PluginInstance) -> Option<PluginInstance> {
        self.plugins.insert(instance.name().to_string(), instance)
    }

    pub fn remove(&mut self, name: &str) -> Option<PluginInstance> {
        self.plugins.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&PluginInstance> {
        self.plugins.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginInstance> {
        self.plugins.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginInstance> {
        self.plugins.values()
    }

    pub fn state_of(&self, name: &str) -> Option<PluginState> {
        self.plugins.get(name).map(|instance| instance.state)
    }

    pub fn manifests(&self) -> Vec<PluginManifest> {
        self.plugins
            .values()
            .map(|instance| instance.manifest.as_ref().clone())
            .collect()
    }

    /// Resolve the graph of every loaded manifest
    pub fn load_order(&self) -> Result<LoadOrder, PluginSystemError> {
        Ok(resolve(&self.manifests())?)
    }

    /// Loaded plugins that list `name` as a dependency, sorted
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.plugins
            .values()
            .filter(|instance| instance.manifest.depends_on(name))
            .map(|instance| instance.name().to_string())
            .collect()
    }

    /// Dependencies of `name` that are not currently RUNNING, sorted
    pub fn unmet_dependencies(&self, name: &str) -> Vec<String> {
        let Some(instance) = self.plugins.get(name) else {
            return Vec::new();
        };
        let mut waiting: Vec<String> = instance
            .manifest
            .dependency_names()
            .filter(|dep| self.state_of(dep) != Some(PluginState::Running))
            .map(str::to_string)
            .collect();
        waiting.sort();
        waiting
    }

    pub fn snapshots(&self) -> Vec<PluginSnapshot> {
        self.plugins.values().map(PluginInstance::snapshot).collect()
    }
}
