//! # Hearth Supervisor Errors
//!
//! Failures of one plugin's process lifecycle. `StartTimeout`, `StartFailed`
//! and `SpawnFailed` are failed starts and never consume a restart attempt;
//! `ProcessCrash` and `ResourceLimitExceeded` do.
use thiserror::Error;

use crate::supervisor::process::ProcessExit;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn plugin '{plugin}': {message}")]
    SpawnFailed { plugin: String, message: String },

    #[error("Plugin '{plugin}' did not complete its health handshake within {timeout_ms}ms")]
    StartTimeout { plugin: String, timeout_ms: u64 },

    #[error("Plugin '{plugin}' exited before becoming healthy ({exit})")]
    StartFailed { plugin: String, exit: ProcessExit },

    #[error("Plugin '{plugin}' crashed ({exit})")]
    ProcessCrash { plugin: String, exit: ProcessExit },

    #[error("Plugin '{plugin}' exceeded its {resource} limit: {observed} > {limit}")]
    ResourceLimitExceeded {
        plugin: String,
        resource: String,
        observed: String,
        limit: String,
    },

    #[error("Start of plugin '{plugin}' was cancelled by a stop request")]
    Cancelled { plugin: String },

    #[error("Failed to stop plugin '{plugin}': {message}")]
    StopFailed { plugin: String, message: String },

    #[error("Plugin '{plugin}' is already starting")]
    Busy { plugin: String },

    #[error("Supervisor of plugin '{plugin}' is not running")]
    Unavailable { plugin: String },

    #[error("Bus error while supervising '{plugin}': {message}")]
    Bus { plugin: String, message: String },
}

impl SupervisorError {
    /// Whether this failure consumes a restart attempt
    pub fn counts_as_crash(&self) -> bool {
        matches!(
            self,
            SupervisorError::ProcessCrash { .. } | SupervisorError::ResourceLimitExceeded { .. }
        )
    }

    pub fn plugin(&self) -> &str {
        match self {
            SupervisorError::SpawnFailed { plugin, .. }
            | SupervisorError::StartTimeout { plugin, .. }
            | SupervisorError::StartFailed { plugin, .. }
            | SupervisorError::ProcessCrash { plugin, .. }
            | SupervisorError::ResourceLimitExceeded { plugin, .. }
            | SupervisorError::Cancelled { plugin }
            | SupervisorError::StopFailed { plugin, .. }
            | SupervisorError::Busy { plugin }
            | SupervisorError::Unavailable { plugin }
            | SupervisorError::Bus { plugin, .. } => plugin,
        }
    }
}
