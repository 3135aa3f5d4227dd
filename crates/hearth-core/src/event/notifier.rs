use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{BusMessage, MessageBus};
use crate::event::{LifecycleEvent, SharedEventDispatcher};

/// Fire-and-forget sender of lifecycle events.
///
/// Events are delivered to observers and then published on the bus by a
/// dedicated task, strictly in emission order. Emitting never blocks.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    sender: mpsc::UnboundedSender<LifecycleEvent>,
}

impl EventNotifier {
    /// Spawn the delivery task. It ends once every notifier clone is dropped.
    pub fn spawn(dispatcher: SharedEventDispatcher, bus: Arc<dyn MessageBus>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<LifecycleEvent>();
        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                log::debug!("lifecycle: {} ({})", event.subject(), event.plugin());
                dispatcher.dispatch(&event).await;
                match BusMessage::from_serializable(event.subject(), &event) {
                    Ok(message) => {
                        if let Err(e) = bus.publish(message).await {
                            log::warn!("Failed to publish {} for '{}': {}", event.subject(), event.plugin(), e);
                        }
                    }
                    Err(e) => log::warn!("Failed to encode lifecycle event: {}", e),
                }
            }
            log::debug!("Lifecycle notifier stopped");
        });
        (Self { sender }, task)
    }

    pub fn emit(&self, event: LifecycleEvent) {
        if self.sender.send(event).is_err() {
            log::warn!("Lifecycle notifier is gone; dropping event");
        }
    }
}
