use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::permission::{Capability, Profile};
use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::version::parse_version;

/// Per-process ceilings enforced by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Share of one core, in percent (200 = two full cores)
    pub cpu_percent: u32,
    pub memory_mb: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_percent: 100,
            memory_mb: 512,
        }
    }
}

/// Crash restart policy: attempt *n* waits
/// `min(backoff_cap_ms, backoff_base_ms * backoff_factor^(n-1))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub backoff_cap_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 100,
            backoff_factor: 2.0,
            backoff_cap_ms: 30_000,
        }
    }
}

// --- Intermediate struct for deserialization ---

#[derive(Deserialize, Debug)]
struct RawPluginManifest {
    name: String,
    version: String,
    entry_point: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    profile: Profile,
    #[serde(default)]
    declared_capabilities: Vec<String>,
    #[serde(default)]
    resource_limits: ResourceLimits,
    #[serde(default)]
    restart_policy: RestartPolicy,
    #[serde(default)]
    startup_timeout_ms: Option<u64>,
    #[serde(default)]
    stop_timeout_ms: Option<u64>,
}

/// Declarative description of one plugin process. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPluginManifest")]
pub struct PluginManifest {
    pub name: String,
    pub version: Version,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub entry_point: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub dependencies: Vec<PluginDependency>,
    pub profile: Profile,
    pub declared_capabilities: BTreeSet<Capability>,
    pub resource_limits: ResourceLimits,
    pub restart_policy: RestartPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_timeout_ms: Option<u64>,
    /// File the manifest was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl TryFrom<RawPluginManifest> for PluginManifest {
    type Error = PluginSystemError;

    fn try_from(raw: RawPluginManifest) -> Result<Self, Self::Error> {
        let name = raw.name.trim().to_string();
        let version = parse_version(&raw.version)
            .map_err(|e| PluginSystemError::invalid_manifest(&name, e.to_string()))?;
        let dependencies = raw
            .dependencies
            .iter()
            .map(|spec| PluginDependency::parse(spec))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PluginSystemError::invalid_manifest(&name, e.to_string()))?;
        let declared_capabilities = raw
            .declared_capabilities
            .iter()
            .map(|capability| capability.parse::<Capability>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|e| PluginSystemError::invalid_manifest(&name, e.to_string()))?;

        let manifest = PluginManifest {
            name,
            version,
            description: raw.description,
            entry_point: raw.entry_point,
            args: raw.args,
            env: raw.env,
            dependencies,
            profile: raw.profile,
            declared_capabilities,
            resource_limits: raw.resource_limits,
            restart_policy: raw.restart_policy,
            startup_timeout_ms: raw.startup_timeout_ms,
            stop_timeout_ms: raw.stop_timeout_ms,
            source: None,
        };
        manifest.validate()?;
        Ok(manifest)
    }
}

impl PluginManifest {
    /// Names of the plugins this one depends on, in declaration order
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|dep| dep.plugin_name.as_str())
    }

    pub fn depends_on(&self, plugin: &str) -> bool {
        self.dependency_names().any(|name| name == plugin)
    }

    pub fn startup_timeout_override(&self) -> Option<Duration> {
        self.startup_timeout_ms.map(Duration::from_millis)
    }

    pub fn stop_timeout_override(&self) -> Option<Duration> {
        self.stop_timeout_ms.map(Duration::from_millis)
    }

    /// Check every structural rule a manifest must satisfy before it can be loaded.
    pub fn validate(&self) -> Result<(), PluginSystemError> {
        let fail = |reason: &str| Err(PluginSystemError::invalid_manifest(&self.name, reason));

        if self.name.is_empty() {
            return fail("name must not be empty");
        }
        // The name becomes a bus subject token.
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return fail("name may only contain lowercase letters, digits, '_' and '-'");
        }
        if self.entry_point.trim().is_empty() {
            return fail("entry_point must not be empty");
        }

        let mut seen = BTreeSet::new();
        for dep in &self.dependencies {
            if !seen.insert(dep.plugin_name.as_str()) {
                return fail(&format!("dependency '{}' is listed more than once", dep.plugin_name));
            }
        }

        if self.resource_limits.cpu_percent == 0 {
            return fail("resource_limits.cpu_percent must be positive");
        }
        if self.resource_limits.memory_mb == 0 {
            return fail("resource_limits.memory_mb must be positive");
        }

        let policy = &self.restart_policy;
        if policy.backoff_base_ms == 0 {
            return fail("restart_policy.backoff_base_ms must be positive");
        }
        if !policy.backoff_factor.is_finite() || policy.backoff_factor < 1.0 {
            return fail("restart_policy.backoff_factor must be at least 1");
        }
        if policy.backoff_cap_ms < policy.backoff_base_ms {
            return fail("restart_policy.backoff_cap_ms must not be below backoff_base_ms");
        }

        if self.startup_timeout_ms == Some(0) || self.stop_timeout_ms == Some(0) {
            return fail("timeouts must be positive");
        }
        Ok(())
    }
}

/// Builder for creating a plugin manifest in code
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    name: String,
    version: String,
    entry_point: String,
    description: Option<String>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    dependencies: Vec<String>,
    profile: Profile,
    declared_capabilities: Vec<String>,
    resource_limits: ResourceLimits,
    restart_policy: RestartPolicy,
    startup_timeout_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
}

impl ManifestBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            entry_point: name.to_string(),
            description: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            dependencies: Vec::new(),
            profile: Profile::default(),
            declared_capabilities: Vec::new(),
            resource_limits: ResourceLimits::default(),
            restart_policy: RestartPolicy::default(),
            startup_timeout_ms: None,
            stop_timeout_ms: None,
        }
    }

    pub fn entry_point(mut self, entry_point: &str) -> Self {
        self.entry_point = entry_point.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Add a dependency in `name` or `name@constraint` form
    pub fn dependency(mut self, spec: &str) -> Self {
        self.dependencies.push(spec.to_string());
        self
    }

    pub fn profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn capability(mut self, capability: &str) -> Self {
        self.declared_capabilities.push(capability.to_string());
        self
    }

    pub fn resource_limits(mut self, cpu_percent: u32, memory_mb: u64) -> Self {
        self.resource_limits = ResourceLimits { cpu_percent, memory_mb };
        self
    }

    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn startup_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.startup_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn stop_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stop_timeout_ms = Some(timeout_ms);
        self
    }

    /// Parse and validate the collected fields
    pub fn build(self) -> Result<PluginManifest, PluginSystemError> {
        PluginManifest::try_from(RawPluginManifest {
            name: self.name,
            version: self.version,
            entry_point: self.entry_point,
            description: self.description,
            args: self.args,
            env: self.env,
            dependencies: self.dependencies,
            profile: self.profile,
            declared_capabilities: self.declared_capabilities,
            resource_limits: self.resource_limits,
            restart_policy: self.restart_policy,
            startup_timeout_ms: self.startup_timeout_ms,
            stop_timeout_ms: self.stop_timeout_ms,
        })
    }
}
