//! # Hearth Lifecycle Events
//!
//! Lifecycle notifications ([`LifecycleEvent`]) flow from the plugin manager
//! to registered [`LifecycleObserver`]s and onto the bus through the
//! [`EventNotifier`]. They are informational only.
pub mod dispatcher;
pub mod notifier;
pub mod types;

use async_trait::async_trait;

/// Observer registration identifier
pub type ObserverId = u64;

/// Event priority level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum EventPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

/// Whether delivery continues to later observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResult {
    Continue,
    Stop,
}

/// Consumer of lifecycle notifications (CLI status, inspector tooling)
#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    async fn on_event(&self, event: &LifecycleEvent) -> EventResult;
}

pub use dispatcher::{sync_observer, EventDispatcher, SharedEventDispatcher};
pub use notifier::EventNotifier;
pub use types::LifecycleEvent;

#[cfg(test)]
mod tests;
