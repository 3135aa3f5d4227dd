use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::bus::subject::{subject_matches, validate_pattern, validate_subject};
use crate::bus::{BusError, BusMessage, MessageBus, Subscription};
use crate::kernel::constants::INBOX_PREFIX;

struct Subscriber {
    pattern: String,
    sender: mpsc::UnboundedSender<BusMessage>,
}

/// In-process NATS-style bus.
///
/// Delivery is fan-out to every live matching subscription in subscription
/// order. Dropped subscriptions are pruned on the next publish.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_inbox: Arc<AtomicU64>,
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        let subscribers = self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.iter().filter(|s| !s.sender.is_closed()).count()
    }

    /// Whether any live subscription matches `subject`.
    pub fn has_subscribers(&self, subject: &str) -> bool {
        let subscribers = self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers
            .iter()
            .any(|s| !s.sender.is_closed() && subject_matches(&s.pattern, subject))
    }

    fn deliver(&self, message: &BusMessage) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|s| !s.sender.is_closed());
        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if subject_matches(&subscriber.pattern, &message.subject)
                && subscriber.sender.send(message.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        log::trace!("bus: '{}' delivered to {} subscriber(s)", message.subject, delivered);
        delivered
    }

    fn new_inbox(&self) -> String {
        let id = self.next_inbox.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}.{}", INBOX_PREFIX, id)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        validate_subject(&message.subject)?;
        if let Some(reply_to) = &message.reply_to {
            validate_subject(reply_to)?;
        }
        self.deliver(&message);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        validate_pattern(pattern)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.push(Subscriber {
            pattern: pattern.to_string(),
            sender,
        });
        Ok(Subscription::new(pattern, receiver))
    }

    async fn request(&self, subject: &str, payload: Value, timeout: Duration) -> Result<BusMessage, BusError> {
        validate_subject(subject)?;
        let inbox = self.new_inbox();
        let mut replies = self.subscribe(&inbox).await?;

        let message = BusMessage::new(subject, payload).with_reply_to(&inbox);
        if self.deliver(&message) == 0 {
            return Err(BusError::NoResponders {
                subject: subject.to_string(),
            });
        }

        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Err(BusError::RequestTimeout {
                subject: subject.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
