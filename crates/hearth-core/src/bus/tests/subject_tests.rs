use crate::bus::subject::{is_inbox, subject_matches, validate_pattern, validate_subject, PluginSubjects};

#[test]
fn test_exact_and_wildcard_matching() {
    assert!(subject_matches("plugin.loaded", "plugin.loaded"));
    assert!(!subject_matches("plugin.loaded", "plugin.started"));
    assert!(subject_matches("plugin.*", "plugin.started"));
    assert!(!subject_matches("plugin.*", "plugin.echo.ready"));
    assert!(subject_matches("plugin.echo.>", "plugin.echo.reply.7"));
    assert!(!subject_matches("plugin.echo.>", "plugin.echo"));
    assert!(subject_matches(">", "anything.at.all"));
    assert!(!subject_matches("plugin.echo.ready", "plugin.echo"));
}

#[test]
fn test_subject_validation() {
    assert!(validate_subject("chat.outbound.room1").is_ok());
    assert!(validate_subject("").is_err());
    assert!(validate_subject("chat..room").is_err());
    assert!(validate_subject("chat.*").is_err());
    assert!(validate_subject("chat.room one").is_err());
}

#[test]
fn test_pattern_validation() {
    assert!(validate_pattern("plugin.*.ready").is_ok());
    assert!(validate_pattern("plugin.>").is_ok());
    assert!(validate_pattern("plugin.>.ready").is_err());
    assert!(validate_pattern("plugin.a*").is_err());
    assert!(validate_pattern("").is_err());
}

#[test]
fn test_plugin_subjects() {
    let subjects = PluginSubjects::new("echo");
    assert_eq!(subjects.prefix(), "plugin.echo");
    assert_eq!(subjects.ready(), "plugin.echo.ready");
    assert_eq!(subjects.control(), "plugin.echo.control");
    assert_eq!(subjects.rpc(), "plugin.echo.rpc");
    assert_eq!(subjects.inbox(), "plugin.echo.inbox");
    assert_eq!(subjects.reply(3), "plugin.echo.reply.3");
    assert_eq!(subjects.command(), "command.echo");
    assert!(subject_matches(&subjects.replies(), &subjects.reply(3)));

    assert!(subjects.owns("plugin.echo.state"));
    assert!(!subjects.owns("plugin.echo"));
    assert!(!subjects.owns("plugin.echoes.state"));
    assert!(!subjects.owns("plugin.other.state"));
}

#[test]
fn test_inbox_detection() {
    assert!(is_inbox("_INBOX.12"));
    assert!(!is_inbox("_INBOX"));
    assert!(!is_inbox("_INBOXES.1"));
}
