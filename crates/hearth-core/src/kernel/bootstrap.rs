use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::bus::{InMemoryBus, MessageBus};
use crate::config::RuntimeConfig;
use crate::kernel::constants;
use crate::kernel::error::{Error, Result, RuntimeLifecyclePhase};
use crate::permission::PermissionEnforcer;
use crate::plugin_system::{ManifestLoader, PluginManager, StartOutcome, StopResult};
use crate::supervisor::{OsProcessLauncher, ProcessLauncher, ResourceSampler, SupervisorContext, SysinfoSampler};

/// What happened to each manifest of a directory load
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Plugins now LOADED, sorted
    pub loaded: Vec<String>,
    /// Plugin name (or file path when the manifest did not parse) -> reason
    pub failed: BTreeMap<String, String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The assembled runtime: bus, permission enforcer and plugin manager.
pub struct Runtime {
    config: RuntimeConfig,
    bus: Arc<dyn MessageBus>,
    manager: PluginManager,
    manager_task: JoinHandle<()>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Assemble a runtime around the given bus and process seams.
    pub fn new(
        config: RuntimeConfig,
        bus: Arc<dyn MessageBus>,
        launcher: Arc<dyn ProcessLauncher>,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Result<Self> {
        log::info!("Initializing {} v{}", constants::APP_NAME, constants::APP_VERSION);
        config.validate()?;

        let context = SupervisorContext {
            bus: bus.clone(),
            launcher,
            sampler,
            enforcer: Arc::new(PermissionEnforcer::new()),
        };
        let (manager, manager_task) = PluginManager::spawn(config.manager.clone(), config.supervisor.clone(), context);
        Ok(Self {
            config,
            bus,
            manager,
            manager_task,
        })
    }

    /// In-memory bus, OS processes and sysinfo sampling.
    pub fn with_defaults(config: RuntimeConfig) -> Result<Self> {
        let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
        let launcher = Arc::new(OsProcessLauncher::new(bus.clone()));
        Self::new(config, bus, launcher, Arc::new(SysinfoSampler::new()))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    /// Load every manifest in `dir`, then apply configured grants to the
    /// plugins that loaded.
    pub async fn load_manifests(&self, dir: &Path) -> Result<LoadReport> {
        let scan = ManifestLoader::load_dir(dir).await?;
        let mut report = LoadReport::default();
        for failure in scan.failures {
            report
                .failed
                .insert(failure.path.display().to_string(), failure.error.to_string());
        }

        let results = self.manager.load_many(scan.manifests).await?;
        for (name, result) in results {
            match result {
                Ok(()) => report.loaded.push(name),
                Err(e) => {
                    log::error!("Failed to load plugin '{}': {}", name, e);
                    report.failed.insert(name, e.to_string());
                }
            }
        }

        self.apply_grants(&report.loaded).await;
        Ok(report)
    }

    /// Apply configured grants whose plugin is in `loaded`. Returns how many
    /// were applied; rejected grants are logged and skipped.
    pub async fn apply_grants(&self, loaded: &[String]) -> usize {
        let mut applied = 0;
        for grant in self.config.grants.iter().filter(|grant| loaded.contains(&grant.plugin)) {
            match self
                .manager
                .grant(&grant.plugin, grant.capability.clone(), &grant.granted_by, grant.expires_at)
                .await
            {
                Ok(_) => applied += 1,
                Err(e) => log::warn!("Skipping configured grant '{}' for '{}': {}", grant.capability, grant.plugin, e),
            }
        }
        applied
    }

    /// Load the configured manifest directory (if any) and start everything.
    pub async fn boot(&self) -> Result<(LoadReport, BTreeMap<String, StartOutcome>)> {
        let report = match self.config.manifest_dir.as_deref() {
            Some(dir) => self.load_manifests(dir).await?,
            None => {
                log::warn!("No manifest directory configured; starting with no plugins");
                LoadReport::default()
            }
        };
        let outcomes = self.manager.start_all().await?;
        Ok((report, outcomes))
    }

    /// Stop every plugin, dependents first, and wait for the manager to exit.
    pub async fn shutdown(self) -> Result<BTreeMap<String, StopResult>> {
        log::info!("Shutting down {}", constants::APP_NAME);
        let results = self.manager.shutdown().await?;
        self.manager_task.await.map_err(|e| Error::RuntimeLifecycle {
            phase: RuntimeLifecyclePhase::Shutdown,
            message: format!("plugin manager task failed: {}", e),
        })?;
        for (name, result) in &results {
            if let Err(e) = result {
                log::warn!("Plugin '{}' did not stop cleanly: {}", name, e);
            }
        }
        Ok(results)
    }
}

