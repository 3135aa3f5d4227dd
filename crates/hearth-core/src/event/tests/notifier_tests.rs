use std::sync::{Arc, Mutex};

use crate::bus::{InMemoryBus, MessageBus};
use crate::event::{sync_observer, EventNotifier, EventResult, LifecycleEvent, SharedEventDispatcher};

#[tokio::test]
async fn test_events_reach_observers_and_bus_in_order() {
    let bus = InMemoryBus::new();
    let mut published = bus.subscribe("plugin.*").await.unwrap();
    let dispatcher = SharedEventDispatcher::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    dispatcher
        .register_fn(">", sync_observer(move |event| {
            sink.lock().unwrap().push(event.plugin().to_string());
            EventResult::Continue
        }))
        .await
        .unwrap();

    let (notifier, task) = EventNotifier::spawn(dispatcher, Arc::new(bus.clone()));
    notifier.emit(LifecycleEvent::Loaded { plugin: "a".into(), version: "1.0.0".into() });
    notifier.emit(LifecycleEvent::Started { plugin: "b".into(), pid: None });
    notifier.emit(LifecycleEvent::Stopped { plugin: "c".into(), error: None });
    drop(notifier);
    task.await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    let first = published.next().await.unwrap();
    assert_eq!(first.subject, "plugin.loaded");
    assert_eq!(first.payload["plugin"], "a");
    assert_eq!(published.next().await.unwrap().subject, "plugin.started");
    assert_eq!(published.next().await.unwrap().subject, "plugin.stopped");
}
