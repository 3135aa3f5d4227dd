//! # Hearth Plugin System Errors
//!
//! [`PluginSystemError`] covers manifest validation, manifest files, graph
//! resolution and the manager's administrative operations. Graph errors are
//! the [`DependencyError`] of the resolver, carried unchanged.
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::permission::PermissionError;
use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::registry::PluginState;
use crate::plugin_system::version::VersionError;
use crate::supervisor::SupervisorError;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Invalid manifest for '{plugin}': {reason}")]
    InvalidManifest { plugin: String, reason: String },

    #[error("Failed to load manifest '{}': {source}", path.display())]
    ManifestFile {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error("Dependency resolution failed: {0}")]
    Dependency(#[from] DependencyError),

    #[error("Version parsing error: {0}")]
    Version(#[from] VersionError),

    #[error("Permission check failed: {0}")]
    Permission(#[from] PermissionError),

    #[error("Plugin '{plugin}' is already loaded at version {version}; use replace to change it")]
    AlreadyLoaded { plugin: String, version: String },

    #[error("Plugin '{0}' is not loaded")]
    NotLoaded(String),

    #[error("Plugin '{plugin}' is required by loaded plugins: {}", .dependents.join(", "))]
    HasDependents { plugin: String, dependents: Vec<String> },

    #[error("Plugin '{plugin}' cannot move from {from} to {to}")]
    InvalidTransition {
        plugin: String,
        from: PluginState,
        to: PluginState,
    },

    #[error("Supervisor of plugin '{plugin}' failed: {source}")]
    Supervisor {
        plugin: String,
        #[source]
        source: SupervisorError,
    },

    #[error("Plugin manager is no longer running")]
    ManagerUnavailable,
}

impl PluginSystemError {
    pub fn invalid_manifest(plugin: &str, reason: impl Into<String>) -> Self {
        PluginSystemError::InvalidManifest {
            plugin: plugin.to_string(),
            reason: reason.into(),
        }
    }

    /// The graph error behind this failure, if any
    pub fn as_dependency_error(&self) -> Option<&DependencyError> {
        match self {
            PluginSystemError::Dependency(err) => Some(err),
            _ => None,
        }
    }
}
