//! # Hearth Message Bus
//!
//! The runtime reaches every external collaborator (router, storage, chat
//! gateway) only through publish/subscribe/request-reply on a [`MessageBus`].
//! [`InMemoryBus`] is the in-process reference transport; any substrate with
//! at-least-once delivery can implement the trait.
pub mod memory;
pub mod subject;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::InMemoryBus;
pub use subject::{subject_matches, PluginSubjects};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Invalid subject '{0}'")]
    InvalidSubject(String),

    #[error("Invalid subscription pattern '{0}'")]
    InvalidPattern(String),

    #[error("No responders for request on '{subject}'")]
    NoResponders { subject: String },

    #[error("Request on '{subject}' timed out after {timeout_ms}ms")]
    RequestTimeout { subject: String, timeout_ms: u64 },

    #[error("Bus connection closed")]
    Closed,

    #[error("Failed to encode message for '{subject}': {source}")]
    Encode {
        subject: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One message on the bus. Payloads are JSON documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl BusMessage {
    pub fn new(subject: &str, payload: Value) -> Self {
        Self {
            subject: subject.to_string(),
            reply_to: None,
            payload,
        }
    }

    pub fn with_reply_to(mut self, reply_to: &str) -> Self {
        self.reply_to = Some(reply_to.to_string());
        self
    }

    /// Build a message from any serializable payload.
    pub fn from_serializable<T: Serialize>(subject: &str, payload: &T) -> Result<Self, BusError> {
        let payload = serde_json::to_value(payload).map_err(|source| BusError::Encode {
            subject: subject.to_string(),
            source,
        })?;
        Ok(Self::new(subject, payload))
    }
}

/// A live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    pattern: String,
    receiver: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    pub fn new(pattern: &str, receiver: mpsc::UnboundedReceiver<BusMessage>) -> Self {
        Self {
            pattern: pattern.to_string(),
            receiver,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Wait for the next message; `None` once the bus side is gone.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<BusMessage> {
        self.receiver.try_recv().ok()
    }
}

/// Publish/subscribe/request-reply transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, message: BusMessage) -> Result<(), BusError>;

    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError>;

    /// Publish with a generated reply inbox and wait for the first reply.
    async fn request(&self, subject: &str, payload: Value, timeout: Duration) -> Result<BusMessage, BusError>;

    async fn publish_to(&self, subject: &str, payload: Value) -> Result<(), BusError> {
        self.publish(BusMessage::new(subject, payload)).await
    }
}

#[cfg(test)]
mod tests;
