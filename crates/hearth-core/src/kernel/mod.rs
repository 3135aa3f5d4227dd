//! # Hearth Core Kernel
//!
//! Runtime assembly and the pieces every subsystem shares.
//!
//! - **[`bootstrap`]**: [`Runtime`] wires the bus, the permission enforcer and
//!   the [`PluginManager`](crate::plugin_system::PluginManager) together,
//!   loads manifests, applies configured grants and drives start and shutdown.
//! - **[`constants`]**: names, environment variables and default timings.
//! - **[`error`]**: the root [`Error`] and its `Result` alias.
pub mod bootstrap;
pub mod constants;
pub mod error;

pub use bootstrap::{LoadReport, Runtime};
pub use error::{Error, Result, RuntimeLifecyclePhase};
