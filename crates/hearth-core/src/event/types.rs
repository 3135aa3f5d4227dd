use serde::{Deserialize, Serialize};

use crate::event::EventPriority;

/// Informational lifecycle notifications emitted by the plugin manager.
///
/// Observers consume these for status displays. The manager never reads them
/// back to drive orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Loaded {
        plugin: String,
        version: String,
    },
    Started {
        plugin: String,
        pid: Option<u32>,
    },
    Stopped {
        plugin: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Crashed {
        plugin: String,
        error: String,
        restart_count: u32,
    },
    Blocked {
        plugin: String,
        waiting_on: Vec<String>,
    },
    Disabled {
        plugin: String,
        error: Option<String>,
    },
    PermissionDenied {
        plugin: String,
        capability: String,
        subject: String,
    },
    Unloaded {
        plugin: String,
    },
}

impl LifecycleEvent {
    /// Well-known bus subject this event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            LifecycleEvent::Loaded { .. } => "plugin.loaded",
            LifecycleEvent::Started { .. } => "plugin.started",
            LifecycleEvent::Stopped { .. } => "plugin.stopped",
            LifecycleEvent::Crashed { .. } => "plugin.crashed",
            LifecycleEvent::Blocked { .. } => "plugin.blocked",
            LifecycleEvent::Disabled { .. } => "plugin.disabled",
            LifecycleEvent::PermissionDenied { .. } => "permission.denied",
            LifecycleEvent::Unloaded { .. } => "plugin.unloaded",
        }
    }

    pub fn plugin(&self) -> &str {
        match self {
            LifecycleEvent::Loaded { plugin, .. }
            | LifecycleEvent::Started { plugin, .. }
            | LifecycleEvent::Stopped { plugin, .. }
            | LifecycleEvent::Crashed { plugin, .. }
            | LifecycleEvent::Blocked { plugin, .. }
            | LifecycleEvent::Disabled { plugin, .. }
            | LifecycleEvent::PermissionDenied { plugin, .. }
            | LifecycleEvent::Unloaded { plugin } => plugin,
        }
    }

    pub fn priority(&self) -> EventPriority {
        match self {
            LifecycleEvent::Crashed { .. } | LifecycleEvent::Disabled { .. } => EventPriority::High,
            LifecycleEvent::PermissionDenied { .. } | LifecycleEvent::Blocked { .. } => EventPriority::Normal,
            _ => EventPriority::Low,
        }
    }

    /// Subjects of every lifecycle event, used to reserve them for the runtime.
    pub fn all_subjects() -> [&'static str; 8] {
        [
            "plugin.loaded",
            "plugin.started",
            "plugin.stopped",
            "plugin.crashed",
            "plugin.blocked",
            "plugin.disabled",
            "permission.denied",
            "plugin.unloaded",
        ]
    }
}
