//! # Hearth Permission Enforcer
//!
//! Capability-based authorization for plugin requests.
//!
//! - **[`capability`]**: the [`Capability`] name type, the well-known catalog
//!   and the totally ordered [`Profile`] ceilings.
//! - **[`enforcer`]**: [`PermissionEnforcer`], which evaluates `check`,
//!   `grant` and `revoke` against each plugin's profile.
//! - **[`audit`]**: the append-only [`AuditLog`] written on every decision.
//! - **[`error`]**: [`PermissionError`].
//!
//! The enforcer has no knowledge of what a capability does. The supervisor
//! consults it synchronously before forwarding any plugin request.
pub mod audit;
pub mod capability;
pub mod enforcer;
pub mod error;

pub use audit::{AuditAction, AuditLog, AuditLogEntry, AuditOutcome};
pub use capability::{names, Capability, Profile};
pub use enforcer::{Decision, PermissionEnforcer, PermissionGrant};
pub use error::PermissionError;

#[cfg(test)]
mod tests;
