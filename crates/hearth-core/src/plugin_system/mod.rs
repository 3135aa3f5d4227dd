//! # Hearth Plugin System
//!
//! Everything the runtime knows about plugins before and after they run:
//!
//! - **[`manifest`]**: the declarative [`PluginManifest`] and its validation.
//! - **[`dependency`]** / **[`version`]**: `name@constraint` dependency specs
//!   and semver ranges.
//! - **[`resolver`]**: turns a set of manifests into a layered [`LoadOrder`],
//!   rejecting missing dependencies, version mismatches and cycles.
//! - **[`loader`]**: discovers and parses manifest files on disk.
//! - **[`registry`]**: the [`PluginState`] machine and the table of loaded
//!   plugin instances.
//! - **[`manager`]**: the [`PluginManager`] control loop that orchestrates
//!   loading, ordered start and stop, grants and supervisor reports.
pub mod dependency;
pub mod error;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod version;

pub use dependency::{DependencyError, PluginDependency};
pub use error::PluginSystemError;
pub use loader::{ManifestFailure, ManifestLoader, ManifestScan};
pub use manager::{LoadResults, PluginManager, StartOutcome, StopResult};
pub use manifest::{ManifestBuilder, PluginManifest, ResourceLimits, RestartPolicy};
pub use registry::{PluginInstance, PluginRegistry, PluginSnapshot, PluginState};
pub use resolver::{resolve, LoadOrder};
pub use version::{parse_version, VersionError, VersionRange};

#[cfg(test)]
mod tests;
