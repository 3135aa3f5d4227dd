use std::time::Duration;

use serde_json::json;

use crate::bus::{BusError, BusMessage, InMemoryBus, MessageBus};

#[tokio::test]
async fn test_publish_reaches_matching_subscribers() {
    let bus = InMemoryBus::new();
    let mut exact = bus.subscribe("plugin.started").await.unwrap();
    let mut wildcard = bus.subscribe("plugin.*").await.unwrap();
    let mut other = bus.subscribe("permission.denied").await.unwrap();

    bus.publish_to("plugin.started", json!({"plugin": "echo"})).await.unwrap();

    assert_eq!(exact.next().await.unwrap().payload["plugin"], "echo");
    assert_eq!(wildcard.next().await.unwrap().subject, "plugin.started");
    assert!(other.try_next().is_none());
}

#[tokio::test]
async fn test_dropped_subscription_is_pruned() {
    let bus = InMemoryBus::new();
    let sub = bus.subscribe("a.b").await.unwrap();
    assert_eq!(bus.subscription_count(), 1);
    drop(sub);
    bus.publish_to("a.b", json!(null)).await.unwrap();
    assert_eq!(bus.subscription_count(), 0);
    assert!(!bus.has_subscribers("a.b"));
}

#[tokio::test]
async fn test_publish_rejects_wildcard_subject() {
    let bus = InMemoryBus::new();
    let err = bus.publish_to("plugin.*", json!(null)).await.unwrap_err();
    assert!(matches!(err, BusError::InvalidSubject(_)));
}

#[tokio::test]
async fn test_request_reply() {
    let bus = InMemoryBus::new();
    let mut service = bus.subscribe("storage.kv.get.>").await.unwrap();
    let responder = bus.clone();
    tokio::spawn(async move {
        if let Some(request) = service.next().await {
            let reply_to = request.reply_to.unwrap();
            responder
                .publish(BusMessage::new(&reply_to, json!({"value": 42})))
                .await
                .unwrap();
        }
    });

    let reply = bus
        .request("storage.kv.get.notes.count", json!({}), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reply.payload["value"], 42);
    assert!(reply.subject.starts_with("_INBOX."));
}

#[tokio::test]
async fn test_request_without_responders() {
    let bus = InMemoryBus::new();
    let err = bus
        .request("storage.kv.get.x", json!({}), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::NoResponders { .. }));
}

#[tokio::test]
async fn test_request_times_out() {
    let bus = InMemoryBus::new();
    let _silent = bus.subscribe("slow.service").await.unwrap();
    let err = bus
        .request("slow.service", json!({}), Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::RequestTimeout { timeout_ms: 20, .. }));
}
