//! # Hearth Process Supervisor
//!
//! One supervisor task per loaded plugin owns that plugin's OS process:
//! spawn with isolation, health handshake, resource monitoring, graceful stop
//! and crash restarts with exponential backoff. Plugin requests are passed
//! through the [`RequestGateway`] and the permission enforcer before they
//! reach the bus.
pub mod backoff;
pub mod error;
pub mod gateway;
pub mod monitor;
pub mod process;
pub mod stdio;
#[allow(clippy::module_inception)]
pub mod supervisor;

pub use backoff::RestartSchedule;
pub use error::SupervisorError;
pub use gateway::{required_capability, GatewayOp, GatewayReply, GatewayRequest, RequestGateway};
pub use monitor::{BreachTracker, BreachVerdict, ResourceSampler, ResourceUsage, SysinfoSampler};
pub use process::{LaunchSpec, OsProcessLauncher, PluginProcess, ProcessExit, ProcessLauncher};
pub use supervisor::{
    StopOutcome, SupervisorConfig, SupervisorContext, SupervisorEvent, SupervisorHandle, SupervisorState,
    SupervisorStatus,
};

#[cfg(test)]
pub(crate) mod tests;
