use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::event::{
    sync_observer, EventDispatcher, EventResult, LifecycleEvent, LifecycleObserver, SharedEventDispatcher,
};

struct Recorder {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl LifecycleObserver for Recorder {
    async fn on_event(&self, event: &LifecycleEvent) -> EventResult {
        self.seen.lock().unwrap().push(event.subject().to_string());
        EventResult::Continue
    }
}

fn started(plugin: &str) -> LifecycleEvent {
    LifecycleEvent::Started { plugin: plugin.into(), pid: Some(7) }
}

#[tokio::test]
async fn test_pattern_filtering() {
    let dispatcher = SharedEventDispatcher::new();
    let all = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
    let denials = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
    dispatcher.register(">", all.clone()).await.unwrap();
    dispatcher.register("permission.*", denials.clone()).await.unwrap();

    dispatcher.dispatch(&started("echo")).await;
    dispatcher
        .dispatch(&LifecycleEvent::PermissionDenied {
            plugin: "echo".into(),
            capability: "system.admin".into(),
            subject: "admin.reload".into(),
        })
        .await;

    assert_eq!(*all.seen.lock().unwrap(), vec!["plugin.started", "permission.denied"]);
    assert_eq!(*denials.seen.lock().unwrap(), vec!["permission.denied"]);
}

#[tokio::test]
async fn test_stop_halts_propagation() {
    let dispatcher = SharedEventDispatcher::new();
    let counter = Arc::new(AtomicU32::new(0));

    let c1 = counter.clone();
    dispatcher
        .register_fn(">", sync_observer(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
            EventResult::Stop
        }))
        .await
        .unwrap();
    let c2 = counter.clone();
    dispatcher
        .register_fn(">", sync_observer(move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
            EventResult::Continue
        }))
        .await
        .unwrap();

    assert_eq!(dispatcher.dispatch(&started("echo")).await, EventResult::Stop);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unregister() {
    let dispatcher = SharedEventDispatcher::new();
    let counter = Arc::new(AtomicU32::new(0));
    let c = counter.clone();
    let id = dispatcher
        .register_fn("plugin.*", sync_observer(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            EventResult::Continue
        }))
        .await
        .unwrap();

    dispatcher.dispatch(&started("a")).await;
    assert!(dispatcher.unregister(id).await);
    assert!(!dispatcher.unregister(id).await);
    dispatcher.dispatch(&started("a")).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.observer_count().await, 0);
}

#[test]
fn test_invalid_pattern_rejected() {
    let mut dispatcher = EventDispatcher::new();
    let result = dispatcher.register_fn("plugin.>.x", sync_observer(|_| EventResult::Continue));
    assert!(result.is_err());
    assert_eq!(dispatcher.observer_count(), 0);
}
