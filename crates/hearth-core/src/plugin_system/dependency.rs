use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::plugin_system::version::VersionRange;

/// A `name` or `name@constraint` entry of a manifest's dependency list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDependency {
    pub plugin_name: String,
    /// `None` accepts any version
    pub version_range: Option<VersionRange>,
}

/// Errors raised while resolving the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("Plugin '{plugin}' depends on '{missing}', which is not loaded")]
    MissingDependency { plugin: String, missing: String },

    #[error("Circular dependency detected: {}", render_cycle(.cycle))]
    CircularDependency { cycle: Vec<String> },

    #[error("Plugin '{plugin}' requires '{dependency}' {required} but found {found}")]
    IncompatibleVersion {
        plugin: String,
        dependency: String,
        required: String,
        found: String,
    },

    #[error("Plugin '{0}' appears more than once")]
    DuplicatePlugin(String),

    #[error("Invalid dependency '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },
}

fn render_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

impl PluginDependency {
    pub fn required(plugin_name: &str, version_range: VersionRange) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            version_range: Some(version_range),
        }
    }

    pub fn required_any(plugin_name: &str) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            version_range: None,
        }
    }

    /// Parse `name` or `name@<semver requirement>`.
    pub fn parse(spec: &str) -> Result<Self, DependencyError> {
        let invalid = |reason: &str| DependencyError::InvalidSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };
        let (name, constraint) = match spec.trim().split_once('@') {
            Some((name, constraint)) => (name.trim(), Some(constraint.trim())),
            None => (spec.trim(), None),
        };
        if name.is_empty() {
            return Err(invalid("missing plugin name"));
        }
        match constraint {
            None => Ok(Self::required_any(name)),
            Some("") => Err(invalid("empty version constraint")),
            Some(constraint) => {
                let range = VersionRange::from_constraint(constraint).map_err(|e| invalid(&e.to_string()))?;
                Ok(Self::required(name, range))
            }
        }
    }

    pub fn is_satisfied_by(&self, version: &Version) -> bool {
        self.version_range
            .as_ref()
            .is_none_or(|range| range.includes(version))
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version_range {
            Some(range) => write!(f, "{}@{}", self.plugin_name, range.constraint_string()),
            None => f.write_str(&self.plugin_name),
        }
    }
}

impl FromStr for PluginDependency {
    type Err = DependencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginDependency::parse(s)
    }
}

impl Serialize for PluginDependency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PluginDependency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PluginDependency::parse(&raw).map_err(serde::de::Error::custom)
    }
}
