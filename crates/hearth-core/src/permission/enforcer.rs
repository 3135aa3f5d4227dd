use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permission::audit::{AuditAction, AuditLog, AuditLogEntry, AuditOutcome};
use crate::permission::capability::{Capability, Profile};
use crate::permission::error::PermissionError;

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// An explicit grant layered on top of a plugin's profile defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub plugin: String,
    pub capability: Capability,
    pub granted_at: DateTime<Utc>,
    pub granted_by: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionGrant {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires| expires > now)
    }
}

#[derive(Debug)]
struct PluginPermissions {
    profile: Profile,
    declared: BTreeSet<Capability>,
    grants: HashMap<Capability, PermissionGrant>,
    revokes: HashSet<Capability>,
}

impl PluginPermissions {
    fn effective_at(&self, now: DateTime<Utc>) -> BTreeSet<Capability> {
        let mut effective = self.profile.default_capabilities();
        effective.extend(
            self.grants
                .values()
                .filter(|grant| grant.is_live_at(now))
                .map(|grant| grant.capability.clone()),
        );
        effective.retain(|capability| !self.revokes.contains(capability));
        effective
    }
}

/// Authorization boundary between plugin requests and the bus.
///
/// Default-deny: a capability is allowed only if it is in the plugin's
/// effective set (`profile defaults ∪ live grants − revokes`). Every decision
/// is appended to the audit log.
#[derive(Debug, Default)]
pub struct PermissionEnforcer {
    plugins: RwLock<HashMap<String, PluginPermissions>>,
    audit: Arc<AuditLog>,
}

impl PermissionEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an enforcer appending to an existing audit log
    pub fn with_audit_log(audit: Arc<AuditLog>) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            audit,
        }
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Validate a plugin's declared capabilities against its profile ceiling
    /// without registering anything.
    pub fn validate_declaration(
        plugin: &str,
        profile: Profile,
        declared: &BTreeSet<Capability>,
    ) -> Result<(), PermissionError> {
        let above: Vec<Capability> = declared
            .iter()
            .filter(|capability| !profile.allows(capability))
            .cloned()
            .collect();
        if above.is_empty() {
            Ok(())
        } else {
            Err(PermissionError::DeclaredAboveCeiling {
                plugin: plugin.to_string(),
                profile,
                capabilities: above,
            })
        }
    }

    /// Register a plugin under a profile. Fails if its declaration exceeds the ceiling.
    pub fn register(
        &self,
        plugin: &str,
        profile: Profile,
        declared: &BTreeSet<Capability>,
    ) -> Result<(), PermissionError> {
        Self::validate_declaration(plugin, profile, declared)?;
        let mut plugins = self.write_table()?;
        if plugins.contains_key(plugin) {
            return Err(PermissionError::AlreadyRegistered(plugin.to_string()));
        }
        plugins.insert(
            plugin.to_string(),
            PluginPermissions {
                profile,
                declared: declared.clone(),
                grants: HashMap::new(),
                revokes: HashSet::new(),
            },
        );
        log::debug!("Registered plugin '{}' with profile {}", plugin, profile);
        Ok(())
    }

    /// Re-register a plugin under a new manifest. Revokes survive; grants the
    /// new profile no longer allows are dropped.
    pub fn update_registration(
        &self,
        plugin: &str,
        profile: Profile,
        declared: &BTreeSet<Capability>,
    ) -> Result<(), PermissionError> {
        Self::validate_declaration(plugin, profile, declared)?;
        let mut plugins = self.write_table()?;
        let Some(permissions) = plugins.get_mut(plugin) else {
            return Err(PermissionError::UnknownPlugin(plugin.to_string()));
        };
        permissions.profile = profile;
        permissions.declared = declared.clone();
        permissions.grants.retain(|capability, _| {
            let keep = profile.allows(capability);
            if !keep {
                log::info!("Dropping grant '{}' of plugin '{}': above {} ceiling", capability, plugin, profile);
            }
            keep
        });
        Ok(())
    }

    /// Forget a plugin's grants and revokes. The audit trail is kept.
    pub fn unregister(&self, plugin: &str) -> Result<(), PermissionError> {
        let mut plugins = self.write_table()?;
        plugins.remove(plugin);
        Ok(())
    }

    pub fn is_registered(&self, plugin: &str) -> bool {
        self.plugins
            .read()
            .map(|plugins| plugins.contains_key(plugin))
            .unwrap_or(false)
    }

    pub fn profile_of(&self, plugin: &str) -> Option<Profile> {
        self.plugins
            .read()
            .ok()
            .and_then(|plugins| plugins.get(plugin).map(|p| p.profile))
    }

    pub fn declared_capabilities(&self, plugin: &str) -> Option<BTreeSet<Capability>> {
        self.plugins
            .read()
            .ok()
            .and_then(|plugins| plugins.get(plugin).map(|p| p.declared.clone()))
    }

    /// Authorize one capability use. Unknown plugins and poisoned state deny.
    pub fn check(&self, plugin: &str, capability: &Capability) -> Decision {
        let now = Utc::now();
        let decision = match self.plugins.read() {
            Ok(plugins) => match plugins.get(plugin) {
                Some(permissions) if permissions.effective_at(now).contains(capability) => Decision::Allow,
                _ => Decision::Deny,
            },
            Err(_) => {
                log::error!("Permission table poisoned; denying '{}' for plugin '{}'", capability, plugin);
                Decision::Deny
            }
        };

        match decision {
            Decision::Allow => self.audit.append(plugin, capability, AuditAction::Check, AuditOutcome::Allowed),
            Decision::Deny => {
                log::info!("Denied capability '{}' for plugin '{}'", capability, plugin);
                self.audit.append(plugin, capability, AuditAction::Deny, AuditOutcome::Denied)
            }
        }
        decision
    }

    /// Grant a capability within the plugin's profile ceiling.
    pub fn grant(
        &self,
        plugin: &str,
        capability: &Capability,
        granted_by: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<PermissionGrant, PermissionError> {
        let mut plugins = self.write_table()?;
        let Some(permissions) = plugins.get_mut(plugin) else {
            drop(plugins);
            self.audit.append(
                plugin,
                capability,
                AuditAction::Grant,
                AuditOutcome::Rejected("unknown plugin".to_string()),
            );
            return Err(PermissionError::UnknownPlugin(plugin.to_string()));
        };

        if !permissions.profile.allows(capability) {
            let profile = permissions.profile;
            drop(plugins);
            self.audit.append(
                plugin,
                capability,
                AuditAction::Grant,
                AuditOutcome::Rejected(format!("exceeds {} ceiling", profile)),
            );
            return Err(PermissionError::CeilingExceeded {
                plugin: plugin.to_string(),
                capability: capability.clone(),
                profile,
            });
        }

        let grant = PermissionGrant {
            plugin: plugin.to_string(),
            capability: capability.clone(),
            granted_at: Utc::now(),
            granted_by: granted_by.to_string(),
            expires_at,
        };
        permissions.revokes.remove(capability);
        permissions.grants.insert(capability.clone(), grant.clone());
        drop(plugins);

        log::info!("Granted '{}' to plugin '{}' (by {})", capability, plugin, granted_by);
        self.audit.append(plugin, capability, AuditAction::Grant, AuditOutcome::Granted);
        Ok(grant)
    }

    /// Revoke a capability. Revokes take precedence over defaults and grants.
    pub fn revoke(&self, plugin: &str, capability: &Capability) -> Result<(), PermissionError> {
        let mut plugins = self.write_table()?;
        let Some(permissions) = plugins.get_mut(plugin) else {
            return Err(PermissionError::UnknownPlugin(plugin.to_string()));
        };
        permissions.grants.remove(capability);
        permissions.revokes.insert(capability.clone());
        drop(plugins);

        log::info!("Revoked '{}' from plugin '{}'", capability, plugin);
        self.audit.append(plugin, capability, AuditAction::Revoke, AuditOutcome::Revoked);
        Ok(())
    }

    /// The plugin's effective capability set right now; empty for unknown plugins.
    pub fn effective_capabilities(&self, plugin: &str) -> BTreeSet<Capability> {
        let now = Utc::now();
        self.plugins
            .read()
            .ok()
            .and_then(|plugins| plugins.get(plugin).map(|p| p.effective_at(now)))
            .unwrap_or_default()
    }

    /// Live (unexpired) grants of a plugin, sorted by capability.
    pub fn grants_of(&self, plugin: &str) -> Vec<PermissionGrant> {
        let now = Utc::now();
        let mut grants: Vec<PermissionGrant> = self
            .plugins
            .read()
            .ok()
            .and_then(|plugins| {
                plugins.get(plugin).map(|p| {
                    p.grants
                        .values()
                        .filter(|grant| grant.is_live_at(now))
                        .cloned()
                        .collect()
                })
            })
            .unwrap_or_default();
        grants.sort_by(|a, b| a.capability.cmp(&b.capability));
        grants
    }

    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit.entries()
    }

    fn write_table(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, PluginPermissions>>, PermissionError> {
        self.plugins.write().map_err(|_| PermissionError::Poisoned {
            component: "plugins".to_string(),
        })
    }
}
