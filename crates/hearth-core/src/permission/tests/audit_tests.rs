use std::sync::Arc;

use crate::permission::{AuditAction, AuditLog, AuditOutcome, Capability};

#[test]
fn test_append_preserves_order() {
    let log = AuditLog::new();
    assert!(log.is_empty());
    let cap = Capability::new("chat.send");
    log.append("alpha", &cap, AuditAction::Check, AuditOutcome::Allowed);
    log.append("beta", &cap, AuditAction::Deny, AuditOutcome::Denied);
    log.append("alpha", &cap, AuditAction::Revoke, AuditOutcome::Revoked);

    let entries = log.entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].plugin, "alpha");
    assert_eq!(entries[1].action, AuditAction::Deny);
    assert_eq!(entries[2].outcome, AuditOutcome::Revoked);
    assert!(entries[0].timestamp <= entries[2].timestamp);
}

#[test]
fn test_entries_for_filters_by_plugin() {
    let log = AuditLog::new();
    let cap = Capability::new("chat.send");
    log.append("alpha", &cap, AuditAction::Check, AuditOutcome::Allowed);
    log.append("beta", &cap, AuditAction::Check, AuditOutcome::Allowed);
    log.append("alpha", &cap, AuditAction::Deny, AuditOutcome::Denied);

    let alpha = log.entries_for("alpha");
    assert_eq!(alpha.len(), 2);
    assert!(alpha.iter().all(|entry| entry.plugin == "alpha"));
}

#[test]
fn test_concurrent_appends() {
    let log = Arc::new(AuditLog::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let log = log.clone();
            std::thread::spawn(move || {
                let cap = Capability::new("bus.publish");
                for _ in 0..50 {
                    log.append(&format!("plugin-{}", i), &cap, AuditAction::Check, AuditOutcome::Allowed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(log.len(), 400);
}

#[test]
fn test_entry_serializes_action_and_outcome() {
    let log = AuditLog::new();
    log.append(
        "alpha",
        &Capability::new("storage.migrate"),
        AuditAction::Grant,
        AuditOutcome::Rejected("exceeds STANDARD ceiling".to_string()),
    );
    let value = serde_json::to_value(&log.entries()[0]).unwrap();
    assert_eq!(value["action"], "grant");
    assert_eq!(value["capability"], "storage.migrate");
    assert_eq!(value["outcome"]["result"], "rejected");
    assert_eq!(value["outcome"]["reason"], "exceeds STANDARD ceiling");
}
