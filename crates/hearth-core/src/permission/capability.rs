use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::permission::error::PermissionError;

/// Well-known capability names
pub mod names {
    pub const COMMAND_RECEIVE: &str = "command.receive";
    pub const CHAT_SEND: &str = "chat.send";
    pub const STORAGE_KV_READ: &str = "storage.kv.read";
    pub const STORAGE_KV_WRITE: &str = "storage.kv.write";
    pub const STORAGE_ROW_READ: &str = "storage.row.read";
    pub const STORAGE_ROW_WRITE: &str = "storage.row.write";
    pub const STORAGE_SQL_READ: &str = "storage.sql.read";
    pub const STORAGE_SQL_WRITE: &str = "storage.sql.write";
    pub const STORAGE_MIGRATE: &str = "storage.migrate";
    pub const BUS_PUBLISH: &str = "bus.publish";
    pub const BUS_SUBSCRIBE: &str = "bus.subscribe";
    pub const BUS_REQUEST: &str = "bus.request";
    pub const PLUGIN_CROSS_PUBLISH: &str = "plugin.cross_publish";
    pub const SYSTEM_ADMIN: &str = "system.admin";
}

/// A named permission a plugin may exercise.
///
/// Capabilities are opaque to the enforcer; only the catalog below assigns
/// them a ceiling and a default profile. Unknown names are valid but require
/// [`Profile::Privileged`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowest profile allowed to hold this capability.
    pub fn ceiling(&self) -> Profile {
        catalog_entry(&self.0)
            .map(|entry| entry.ceiling)
            .unwrap_or(Profile::Privileged)
    }

    /// Lowest profile holding this capability by default, if any.
    pub fn default_from(&self) -> Option<Profile> {
        catalog_entry(&self.0).and_then(|entry| entry.default_from)
    }

    /// Whether the name appears in the built-in catalog.
    pub fn is_well_known(&self) -> bool {
        catalog_entry(&self.0).is_some()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Capability {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let valid = !trimmed.is_empty()
            && trimmed
                .split('.')
                .all(|token| !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(PermissionError::InvalidCapability(s.to_string()))
        }
    }
}

impl From<&str> for Capability {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Capability ceiling profiles, totally ordered from least to most trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Profile {
    Restricted,
    Standard,
    Elevated,
    Privileged,
}

impl Profile {
    pub const ALL: [Profile; 4] = [
        Profile::Restricted,
        Profile::Standard,
        Profile::Elevated,
        Profile::Privileged,
    ];

    /// Capabilities every plugin of this profile holds without a grant.
    pub fn default_capabilities(&self) -> BTreeSet<Capability> {
        CATALOG
            .iter()
            .filter(|entry| entry.default_from.is_some_and(|from| from <= *self))
            .map(|entry| Capability::new(entry.name))
            .collect()
    }

    /// Well-known capabilities this profile may hold at most.
    pub fn ceiling_capabilities(&self) -> BTreeSet<Capability> {
        CATALOG
            .iter()
            .filter(|entry| entry.ceiling <= *self)
            .map(|entry| Capability::new(entry.name))
            .collect()
    }

    /// Whether a capability is within this profile's ceiling.
    pub fn allows(&self, capability: &Capability) -> bool {
        capability.ceiling() <= *self
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Restricted => "RESTRICTED",
            Profile::Standard => "STANDARD",
            Profile::Elevated => "ELEVATED",
            Profile::Privileged => "PRIVILEGED",
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Profile::Restricted
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RESTRICTED" => Ok(Profile::Restricted),
            "STANDARD" => Ok(Profile::Standard),
            "ELEVATED" => Ok(Profile::Elevated),
            "PRIVILEGED" => Ok(Profile::Privileged),
            _ => Err(PermissionError::UnknownProfile(s.to_string())),
        }
    }
}

struct CatalogEntry {
    name: &'static str,
    ceiling: Profile,
    default_from: Option<Profile>,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry { name: names::COMMAND_RECEIVE, ceiling: Profile::Restricted, default_from: Some(Profile::Restricted) },
    CatalogEntry { name: names::CHAT_SEND, ceiling: Profile::Restricted, default_from: Some(Profile::Restricted) },
    CatalogEntry { name: names::STORAGE_KV_READ, ceiling: Profile::Restricted, default_from: Some(Profile::Standard) },
    CatalogEntry { name: names::STORAGE_KV_WRITE, ceiling: Profile::Standard, default_from: Some(Profile::Standard) },
    CatalogEntry { name: names::STORAGE_ROW_READ, ceiling: Profile::Standard, default_from: Some(Profile::Standard) },
    CatalogEntry { name: names::STORAGE_ROW_WRITE, ceiling: Profile::Standard, default_from: Some(Profile::Elevated) },
    CatalogEntry { name: names::BUS_PUBLISH, ceiling: Profile::Standard, default_from: Some(Profile::Standard) },
    CatalogEntry { name: names::BUS_SUBSCRIBE, ceiling: Profile::Standard, default_from: Some(Profile::Standard) },
    CatalogEntry { name: names::BUS_REQUEST, ceiling: Profile::Standard, default_from: Some(Profile::Elevated) },
    CatalogEntry { name: names::STORAGE_SQL_READ, ceiling: Profile::Elevated, default_from: Some(Profile::Elevated) },
    CatalogEntry { name: names::STORAGE_SQL_WRITE, ceiling: Profile::Elevated, default_from: Some(Profile::Privileged) },
    CatalogEntry { name: names::PLUGIN_CROSS_PUBLISH, ceiling: Profile::Elevated, default_from: Some(Profile::Privileged) },
    CatalogEntry { name: names::STORAGE_MIGRATE, ceiling: Profile::Privileged, default_from: Some(Profile::Privileged) },
    CatalogEntry { name: names::SYSTEM_ADMIN, ceiling: Profile::Privileged, default_from: None },
];

fn catalog_entry(name: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.name == name)
}
