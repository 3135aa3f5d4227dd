//! Subject syntax and the per-plugin subject namespace.
//!
//! Subjects are dot-separated, non-empty tokens. Patterns may use `*` for
//! exactly one token and a trailing `>` for one or more tokens.
use crate::bus::BusError;
use crate::kernel::constants::{COMMAND_SUBJECT_ROOT, INBOX_PREFIX, PLUGIN_SUBJECT_ROOT};

pub const SINGLE_WILDCARD: &str = "*";
pub const TAIL_WILDCARD: &str = ">";

/// Validate a concrete subject used for publishing.
pub fn validate_subject(subject: &str) -> Result<(), BusError> {
    let valid = !subject.is_empty()
        && subject
            .split('.')
            .all(|token| !token.is_empty() && token != SINGLE_WILDCARD && token != TAIL_WILDCARD && !token.contains(char::is_whitespace));
    if valid {
        Ok(())
    } else {
        Err(BusError::InvalidSubject(subject.to_string()))
    }
}

/// Validate a subscription pattern.
pub fn validate_pattern(pattern: &str) -> Result<(), BusError> {
    if pattern.is_empty() {
        return Err(BusError::InvalidPattern(pattern.to_string()));
    }
    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len() - 1;
    for (index, token) in tokens.iter().enumerate() {
        let bad = token.is_empty()
            || token.contains(char::is_whitespace)
            || (*token == TAIL_WILDCARD && index != last)
            || (token.len() > 1 && (token.contains('*') || token.contains('>')));
        if bad {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
    }
    Ok(())
}

/// Whether `subject` is matched by `pattern`.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(TAIL_WILDCARD), Some(_)) => return true,
            (Some(SINGLE_WILDCARD), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Public subject the router addresses a plugin's commands to.
pub fn command_subject(plugin: &str) -> String {
    format!("{}.{}", COMMAND_SUBJECT_ROOT, plugin)
}

/// Whether a subject is a request-reply inbox.
pub fn is_inbox(subject: &str) -> bool {
    subject
        .strip_prefix(INBOX_PREFIX)
        .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1)
}

/// The private subjects of one plugin, all under `plugin.<name>.`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSubjects {
    plugin: String,
    prefix: String,
}

impl PluginSubjects {
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            prefix: format!("{}.{}", PLUGIN_SUBJECT_ROOT, plugin),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// `plugin.<name>`, handed to the process as its subject prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Health handshake, plugin to runtime.
    pub fn ready(&self) -> String {
        format!("{}.ready", self.prefix)
    }

    /// Control messages such as shutdown, runtime to plugin.
    pub fn control(&self) -> String {
        format!("{}.control", self.prefix)
    }

    /// Capability-gated requests, plugin to runtime.
    pub fn rpc(&self) -> String {
        format!("{}.rpc", self.prefix)
    }

    /// Relayed chat commands, runtime to plugin.
    pub fn inbox(&self) -> String {
        format!("{}.inbox", self.prefix)
    }

    pub fn reply(&self, id: u64) -> String {
        format!("{}.reply.{}", self.prefix, id)
    }

    pub fn replies(&self) -> String {
        format!("{}.reply.>", self.prefix)
    }

    /// Pattern covering the whole private namespace.
    pub fn namespace(&self) -> String {
        format!("{}.>", self.prefix)
    }

    pub fn command(&self) -> String {
        command_subject(&self.plugin)
    }

    /// Whether `subject` lies strictly inside this plugin's namespace.
    pub fn owns(&self, subject: &str) -> bool {
        subject
            .strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1)
    }
}
