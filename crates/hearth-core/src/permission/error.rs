//! # Hearth Permission Errors
//!
//! Errors raised by the permission enforcer at load and grant time.
//! A denied `check` is not an error; it is a [`Decision`](crate::permission::Decision).
use thiserror::Error;

use crate::permission::capability::{Capability, Profile};

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Capability '{capability}' exceeds the {profile} ceiling of plugin '{plugin}'")]
    CeilingExceeded {
        plugin: String,
        capability: Capability,
        profile: Profile,
    },

    #[error("Plugin '{plugin}' declares capabilities above its {profile} ceiling: {}", join(.capabilities))]
    DeclaredAboveCeiling {
        plugin: String,
        profile: Profile,
        capabilities: Vec<Capability>,
    },

    #[error("Plugin '{0}' is not registered with the permission enforcer")]
    UnknownPlugin(String),

    #[error("Plugin '{0}' is already registered with the permission enforcer")]
    AlreadyRegistered(String),

    #[error("Invalid capability name '{0}'")]
    InvalidCapability(String),

    #[error("Unknown permission profile '{0}'")]
    UnknownProfile(String),

    #[error("Attempted to operate on a poisoned permission table: {component}")]
    Poisoned { component: String },
}

fn join(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
