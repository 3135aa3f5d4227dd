//! # Hearth Core Kernel Errors
//!
//! Defines the root error type of the runtime.
//!
//! Every subsystem owns a typed error enum ([`PluginSystemError`],
//! [`PermissionError`], [`SupervisorError`], [`BusError`], [`ConfigError`]);
//! this module folds them into [`Error`] so the administrative surface can
//! return a single `Result` while callers can still match on the source.
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::bus::BusError;
use crate::config::ConfigError;
use crate::permission::PermissionError;
use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::error::PluginSystemError;
use crate::supervisor::SupervisorError;

/// Root error type for the Hearth runtime
#[derive(Debug, ThisError)]
pub enum Error {
    /// Manifest, registry and orchestration errors
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Authorization errors (ceiling violations, unknown plugins)
    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    /// Process lifecycle errors reported by a supervisor
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// Message bus errors
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Configuration loading errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Error occurring during a specific runtime lifecycle phase.
    #[error("Runtime lifecycle error during {phase}: {message}")]
    RuntimeLifecycle {
        phase: RuntimeLifecyclePhase,
        message: String,
    },

    /// I/O error with the operation and path that caused it
    #[error("I/O error during '{operation}' on '{}': {source}", path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Represents a specific phase in the runtime's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum RuntimeLifecyclePhase {
    #[error("Bootstrap")]
    Bootstrap,
    #[error("Load")]
    Load,
    #[error("Start")]
    Start,
    #[error("Shutdown")]
    Shutdown,
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<DependencyError> for Error {
    fn from(err: DependencyError) -> Self {
        Error::PluginSystem(PluginSystemError::Dependency(err))
    }
}

impl Error {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        Error::Io {
            source,
            operation: operation.into(),
            path,
        }
    }

    /// Returns the dependency error if this error came out of resolution.
    pub fn as_dependency_error(&self) -> Option<&DependencyError> {
        match self {
            Error::PluginSystem(PluginSystemError::Dependency(err)) => Some(err),
            _ => None,
        }
    }
}
