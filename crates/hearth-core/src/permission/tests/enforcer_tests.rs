use std::collections::BTreeSet;

use chrono::{Duration, Utc};

use crate::permission::{
    names, AuditAction, AuditOutcome, Capability, Decision, PermissionEnforcer, PermissionError, Profile,
};

fn caps(list: &[&str]) -> BTreeSet<Capability> {
    list.iter().map(|name| Capability::new(name)).collect()
}

fn enforcer_with(plugin: &str, profile: Profile) -> PermissionEnforcer {
    let enforcer = PermissionEnforcer::new();
    enforcer.register(plugin, profile, &BTreeSet::new()).unwrap();
    enforcer
}

#[test]
fn test_restricted_denied_outside_defaults_and_audited() {
    let enforcer = enforcer_with("greeter", Profile::Restricted);
    let write = Capability::new(names::STORAGE_KV_WRITE);

    assert_eq!(enforcer.check("greeter", &write), Decision::Deny);

    let entries = enforcer.audit_log().entries_for("greeter");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Deny);
    assert_eq!(entries[0].outcome, AuditOutcome::Denied);
    assert_eq!(entries[0].capability, write);
}

#[test]
fn test_default_capability_allowed_and_audited() {
    let enforcer = enforcer_with("greeter", Profile::Restricted);
    let send = Capability::new(names::CHAT_SEND);

    assert_eq!(enforcer.check("greeter", &send), Decision::Allow);
    let entries = enforcer.audit_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Check);
    assert_eq!(entries[0].outcome, AuditOutcome::Allowed);
}

#[test]
fn test_unknown_plugin_is_denied() {
    let enforcer = PermissionEnforcer::new();
    assert_eq!(enforcer.check("ghost", &Capability::new(names::CHAT_SEND)), Decision::Deny);
    assert_eq!(enforcer.audit_log().len(), 1);
    assert!(enforcer.effective_capabilities("ghost").is_empty());
}

#[test]
fn test_declared_capabilities_do_not_grant() {
    let enforcer = PermissionEnforcer::new();
    let declared = caps(&[names::STORAGE_KV_READ]);
    enforcer.register("notes", Profile::Restricted, &declared).unwrap();
    assert_eq!(enforcer.declared_capabilities("notes"), Some(declared));
    assert_eq!(
        enforcer.check("notes", &Capability::new(names::STORAGE_KV_READ)),
        Decision::Deny
    );
}

#[test]
fn test_register_rejects_declaration_above_ceiling() {
    let enforcer = PermissionEnforcer::new();
    let declared = caps(&[names::CHAT_SEND, names::STORAGE_SQL_WRITE, names::SYSTEM_ADMIN]);
    let err = enforcer.register("reports", Profile::Standard, &declared).unwrap_err();
    match err {
        PermissionError::DeclaredAboveCeiling { plugin, profile, capabilities } => {
            assert_eq!(plugin, "reports");
            assert_eq!(profile, Profile::Standard);
            let above: Vec<&str> = capabilities.iter().map(|c| c.as_str()).collect();
            assert_eq!(above, vec![names::STORAGE_SQL_WRITE, names::SYSTEM_ADMIN]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!enforcer.is_registered("reports"));
}

#[test]
fn test_register_twice_fails() {
    let enforcer = enforcer_with("greeter", Profile::Restricted);
    assert!(matches!(
        enforcer.register("greeter", Profile::Standard, &BTreeSet::new()),
        Err(PermissionError::AlreadyRegistered(_))
    ));
    assert_eq!(enforcer.profile_of("greeter"), Some(Profile::Restricted));
}

#[test]
fn test_grant_within_ceiling() {
    let enforcer = enforcer_with("notes", Profile::Standard);
    let write = Capability::new(names::STORAGE_ROW_WRITE);
    assert_eq!(enforcer.check("notes", &write), Decision::Deny);

    let grant = enforcer.grant("notes", &write, "operator", None).unwrap();
    assert_eq!(grant.granted_by, "operator");
    assert_eq!(enforcer.check("notes", &write), Decision::Allow);
    assert_eq!(enforcer.grants_of("notes").len(), 1);

    let grants: Vec<_> = enforcer
        .audit_log()
        .entries_for("notes")
        .into_iter()
        .filter(|entry| entry.action == AuditAction::Grant)
        .collect();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].outcome, AuditOutcome::Granted);
}

#[test]
fn test_grant_above_ceiling_rejected() {
    let enforcer = enforcer_with("greeter", Profile::Restricted);
    let migrate = Capability::new(names::STORAGE_MIGRATE);
    let err = enforcer.grant("greeter", &migrate, "operator", None).unwrap_err();
    assert!(matches!(err, PermissionError::CeilingExceeded { profile: Profile::Restricted, .. }));
    assert_eq!(enforcer.check("greeter", &migrate), Decision::Deny);

    let entries = enforcer.audit_log().entries_for("greeter");
    assert!(matches!(entries[0].outcome, AuditOutcome::Rejected(_)));
}

#[test]
fn test_grant_unknown_plugin_fails() {
    let enforcer = PermissionEnforcer::new();
    assert!(matches!(
        enforcer.grant("ghost", &Capability::new(names::CHAT_SEND), "operator", None),
        Err(PermissionError::UnknownPlugin(_))
    ));
}

#[test]
fn test_revoke_overrides_defaults() {
    let enforcer = enforcer_with("greeter", Profile::Restricted);
    let send = Capability::new(names::CHAT_SEND);
    enforcer.revoke("greeter", &send).unwrap();
    assert_eq!(enforcer.check("greeter", &send), Decision::Deny);
    assert!(!enforcer.effective_capabilities("greeter").contains(&send));

    let revokes: Vec<_> = enforcer
        .audit_entries()
        .into_iter()
        .filter(|entry| entry.action == AuditAction::Revoke)
        .collect();
    assert_eq!(revokes.len(), 1);
}

#[test]
fn test_revoke_removes_grant_and_regrant_clears_revoke() {
    let enforcer = enforcer_with("notes", Profile::Standard);
    let write = Capability::new(names::STORAGE_ROW_WRITE);
    enforcer.grant("notes", &write, "operator", None).unwrap();
    enforcer.revoke("notes", &write).unwrap();
    assert_eq!(enforcer.check("notes", &write), Decision::Deny);
    assert!(enforcer.grants_of("notes").is_empty());

    enforcer.grant("notes", &write, "operator", None).unwrap();
    assert_eq!(enforcer.check("notes", &write), Decision::Allow);
}

#[test]
fn test_expired_grant_is_absent() {
    let enforcer = enforcer_with("notes", Profile::Standard);
    let write = Capability::new(names::STORAGE_ROW_WRITE);
    let past = Utc::now() - Duration::seconds(5);
    enforcer.grant("notes", &write, "operator", Some(past)).unwrap();
    assert_eq!(enforcer.check("notes", &write), Decision::Deny);
    assert!(enforcer.grants_of("notes").is_empty());

    let future = Utc::now() + Duration::hours(1);
    enforcer.grant("notes", &write, "operator", Some(future)).unwrap();
    assert_eq!(enforcer.check("notes", &write), Decision::Allow);
}

#[test]
fn test_effective_set_composition() {
    let enforcer = enforcer_with("notes", Profile::Standard);
    enforcer
        .grant("notes", &Capability::new(names::BUS_REQUEST), "operator", None)
        .unwrap();
    enforcer.revoke("notes", &Capability::new(names::BUS_PUBLISH)).unwrap();

    let mut expected = Profile::Standard.default_capabilities();
    expected.insert(Capability::new(names::BUS_REQUEST));
    expected.remove(&Capability::new(names::BUS_PUBLISH));
    assert_eq!(enforcer.effective_capabilities("notes"), expected);
}

#[test]
fn test_unregister_keeps_audit_trail() {
    let enforcer = enforcer_with("greeter", Profile::Restricted);
    enforcer.check("greeter", &Capability::new(names::CHAT_SEND));
    enforcer.unregister("greeter").unwrap();
    assert!(!enforcer.is_registered("greeter"));
    assert_eq!(enforcer.audit_log().len(), 1);
    assert_eq!(enforcer.check("greeter", &Capability::new(names::CHAT_SEND)), Decision::Deny);
}

#[test]
fn test_update_registration_drops_grants_above_new_ceiling() {
    let enforcer = enforcer_with("notes", Profile::Elevated);
    let sql = Capability::new(names::STORAGE_SQL_WRITE);
    let request = Capability::new(names::BUS_REQUEST);
    enforcer.grant("notes", &sql, "operator", None).unwrap();
    enforcer.revoke("notes", &Capability::new(names::CHAT_SEND)).unwrap();

    enforcer
        .update_registration("notes", Profile::Standard, &caps(&[names::BUS_REQUEST]))
        .unwrap();
    assert_eq!(enforcer.profile_of("notes"), Some(Profile::Standard));
    assert_eq!(enforcer.check("notes", &sql), Decision::Deny);
    assert_eq!(enforcer.check("notes", &Capability::new(names::CHAT_SEND)), Decision::Deny);
    assert_eq!(enforcer.check("notes", &request), Decision::Deny);
    assert_eq!(enforcer.declared_capabilities("notes"), Some(caps(&[names::BUS_REQUEST])));

    let err = enforcer
        .update_registration("ghost", Profile::Standard, &BTreeSet::new())
        .unwrap_err();
    assert!(matches!(err, PermissionError::UnknownPlugin(_)));
}
