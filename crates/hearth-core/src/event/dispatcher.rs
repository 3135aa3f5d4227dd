use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::bus::subject::{subject_matches, validate_pattern};
use crate::bus::BusError;
use crate::event::{EventResult, LifecycleEvent, LifecycleObserver, ObserverId};

pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = EventResult> + Send + 'a>>;

pub type ObserverFn = Box<dyn for<'a> Fn(&'a LifecycleEvent) -> BoxFuture<'a> + Send + Sync>;

struct FnObserver {
    handler: ObserverFn,
}

#[async_trait]
impl LifecycleObserver for FnObserver {
    async fn on_event(&self, event: &LifecycleEvent) -> EventResult {
        (self.handler)(event).await
    }
}

struct Registration {
    id: ObserverId,
    pattern: String,
    observer: Arc<dyn LifecycleObserver>,
}

/// Observer registry keyed by subject pattern (internal, wrapped by [`SharedEventDispatcher`]).
pub struct EventDispatcher {
    observers: Vec<Registration>,
    next_observer_id: ObserverId,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("observers", &self.observers.len())
            .field("next_observer_id", &self.next_observer_id)
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            next_observer_id: 1,
        }
    }

    /// Register an observer for events whose subject matches `pattern`
    /// (`>` for everything, `plugin.*` for plugin lifecycle only).
    pub fn register(&mut self, pattern: &str, observer: Arc<dyn LifecycleObserver>) -> Result<ObserverId, BusError> {
        validate_pattern(pattern)?;
        let id = self.next_observer_id;
        self.next_observer_id += 1;
        self.observers.push(Registration {
            id,
            pattern: pattern.to_string(),
            observer,
        });
        Ok(id)
    }

    pub fn register_fn(&mut self, pattern: &str, handler: ObserverFn) -> Result<ObserverId, BusError> {
        self.register(pattern, Arc::new(FnObserver { handler }))
    }

    pub fn unregister(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|registration| registration.id != id);
        self.observers.len() < before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Observers matching this event, in registration order.
    fn matching(&self, event: &LifecycleEvent) -> Vec<Arc<dyn LifecycleObserver>> {
        self.observers
            .iter()
            .filter(|registration| subject_matches(&registration.pattern, event.subject()))
            .map(|registration| registration.observer.clone())
            .collect()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe shared observer registry
#[derive(Clone, Default)]
pub struct SharedEventDispatcher {
    dispatcher: Arc<Mutex<EventDispatcher>>,
}

impl fmt::Debug for SharedEventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEventDispatcher").finish_non_exhaustive()
    }
}

impl SharedEventDispatcher {
    pub fn new() -> Self {
        Self {
            dispatcher: Arc::new(Mutex::new(EventDispatcher::new())),
        }
    }

    pub async fn register(&self, pattern: &str, observer: Arc<dyn LifecycleObserver>) -> Result<ObserverId, BusError> {
        self.dispatcher.lock().await.register(pattern, observer)
    }

    pub async fn register_fn(&self, pattern: &str, handler: ObserverFn) -> Result<ObserverId, BusError> {
        self.dispatcher.lock().await.register_fn(pattern, handler)
    }

    pub async fn unregister(&self, id: ObserverId) -> bool {
        self.dispatcher.lock().await.unregister(id)
    }

    pub async fn observer_count(&self) -> usize {
        self.dispatcher.lock().await.observer_count()
    }

    /// Deliver an event to matching observers until one returns [`EventResult::Stop`].
    ///
    /// The registry lock is released before any observer runs, so observers
    /// may register or unregister others.
    pub async fn dispatch(&self, event: &LifecycleEvent) -> EventResult {
        let observers = self.dispatcher.lock().await.matching(event);
        for observer in observers {
            if observer.on_event(event).await == EventResult::Stop {
                return EventResult::Stop;
            }
        }
        EventResult::Continue
    }
}

/// Adapt a synchronous closure into an observer handler
pub fn sync_observer<F>(f: F) -> ObserverFn
where
    F: Fn(&LifecycleEvent) -> EventResult + Send + Sync + 'static,
{
    Box::new(move |event| {
        let result = f(event);
        Box::pin(async move { result })
    })
}
