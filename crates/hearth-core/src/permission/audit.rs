use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permission::capability::Capability;

/// What kind of enforcement decision an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// A check that allowed the capability
    Check,
    Grant,
    /// A check that denied the capability
    Deny,
    Revoke,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "lowercase")]
pub enum AuditOutcome {
    Allowed,
    Denied,
    Granted,
    Revoked,
    Rejected(String),
}

/// One enforcement decision. Entries are never mutated after being appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub plugin: String,
    pub capability: Capability,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
}

impl fmt::Display for AuditLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:?} {} -> {:?}",
            self.timestamp.to_rfc3339(),
            self.plugin,
            self.action,
            self.capability,
            self.outcome
        )
    }
}

/// Append-only audit trail, safe for concurrent appends.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, plugin: &str, capability: &Capability, action: AuditAction, outcome: AuditOutcome) {
        let entry = AuditLogEntry {
            timestamp: Utc::now(),
            plugin: plugin.to_string(),
            capability: capability.clone(),
            action,
            outcome,
        };
        log::debug!("audit: {}", entry);
        // A poisoned lock still holds every entry appended so far.
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.push(entry);
    }

    /// Copy of every entry in append order.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn entries_for(&self, plugin: &str) -> Vec<AuditLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|entry| entry.plugin == plugin)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
