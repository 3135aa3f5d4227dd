//! # Hearth Core
//!
//! Runtime core of the Hearth chat-bot platform. Plugins are separate
//! processes described by manifests; the core resolves their dependency
//! graph, supervises each process, and mediates every request a plugin makes
//! through capability checks before it reaches the message bus.
//!
//! - [`plugin_system`]: manifests, dependency resolution and the
//!   [`PluginManager`].
//! - [`supervisor`]: one supervisor task per plugin process (spawn, health
//!   handshake, resource limits, crash restarts).
//! - [`permission`]: capability profiles, grants and the audit log.
//! - [`bus`]: subjects, the [`MessageBus`] trait and an in-memory bus.
//! - [`event`]: lifecycle notifications for observers.
//! - [`config`]: runtime configuration files.
//! - [`kernel`]: runtime assembly ([`Runtime`]) and the root [`Error`].
pub mod bus;
pub mod config;
pub mod event;
pub mod kernel;
pub mod permission;
pub mod plugin_system;
pub mod supervisor;

pub use bus::{BusMessage, InMemoryBus, MessageBus};
pub use config::RuntimeConfig;
pub use event::{LifecycleEvent, LifecycleObserver};
pub use kernel::{Error, Result, Runtime};
pub use permission::{Capability, Decision, PermissionEnforcer, Profile};
pub use plugin_system::{PluginManager, PluginManifest, PluginState, StartOutcome};
pub use supervisor::{StopOutcome, SupervisorError};
