use semver::Version;

use crate::plugin_system::dependency::{DependencyError, PluginDependency};
use crate::plugin_system::version::{parse_version, VersionRange};

#[test]
fn test_parse_name_only_accepts_any_version() {
    let dep = PluginDependency::parse("storage").unwrap();
    assert_eq!(dep.plugin_name, "storage");
    assert!(dep.version_range.is_none());
    assert!(dep.is_satisfied_by(&Version::new(0, 0, 1)));
    assert_eq!(dep.to_string(), "storage");
}

#[test]
fn test_parse_with_constraint() {
    let dep: PluginDependency = "storage@^1.2".parse().unwrap();
    assert_eq!(dep.plugin_name, "storage");
    assert!(dep.is_satisfied_by(&Version::new(1, 4, 0)));
    assert!(!dep.is_satisfied_by(&Version::new(2, 0, 0)));
    assert!(!dep.is_satisfied_by(&Version::new(1, 1, 9)));
    assert_eq!(dep.to_string(), "storage@^1.2");
}

#[test]
fn test_parse_rejects_malformed_specs() {
    for spec in ["", "@^1.0", "storage@", "storage@not-a-range"] {
        match PluginDependency::parse(spec) {
            Err(DependencyError::InvalidSpec { .. }) => {}
            other => panic!("expected InvalidSpec for {:?}, got {:?}", spec, other),
        }
    }
}

#[test]
fn test_dependency_deserializes_from_string() {
    let deps: Vec<PluginDependency> = serde_json::from_str(r#"["a", "b@>=0.3, <0.5"]"#).unwrap();
    assert_eq!(deps[0], PluginDependency::required_any("a"));
    assert!(deps[1].is_satisfied_by(&Version::new(0, 4, 2)));
    assert!(!deps[1].is_satisfied_by(&Version::new(0, 5, 0)));

    let encoded = serde_json::to_string(&deps).unwrap();
    assert_eq!(encoded, r#"["a","b@>=0.3, <0.5"]"#);
}

#[test]
fn test_version_range_any_and_equality() {
    let any = VersionRange::any();
    assert!(any.includes(&Version::new(9, 9, 9)));
    assert_eq!(any.constraint_string(), "*");
    assert_eq!(
        VersionRange::from_constraint("^1.0").unwrap(),
        VersionRange::from_constraint(" ^1.0 ").unwrap()
    );
}

#[test]
fn test_parse_version_requires_full_semver() {
    assert_eq!(parse_version("1.2.3").unwrap(), Version::new(1, 2, 3));
    assert!(parse_version("0.4.0-beta.1").is_ok());
    assert!(parse_version("1.2").is_err());
    assert!(parse_version("latest").is_err());
}

#[test]
fn test_cycle_message_closes_the_loop() {
    let error = DependencyError::CircularDependency {
        cycle: vec!["a".to_string(), "b".to_string()],
    };
    assert_eq!(error.to_string(), "Circular dependency detected: a -> b -> a");
}
