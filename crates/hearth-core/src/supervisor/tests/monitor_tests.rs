use crate::plugin_system::manifest::ResourceLimits;
use crate::supervisor::monitor::{BreachTracker, BreachVerdict, ResourceUsage};

fn usage(cpu_percent: f32, memory_mb: u64) -> ResourceUsage {
    ResourceUsage { cpu_percent, memory_mb }
}

const LIMITS: ResourceLimits = ResourceLimits {
    cpu_percent: 50,
    memory_mb: 128,
};

#[test]
fn test_within_limits() {
    let mut tracker = BreachTracker::new(3);
    assert_eq!(tracker.observe(&usage(10.0, 64), &LIMITS), BreachVerdict::Within);
}

#[test]
fn test_single_spike_is_tolerated() {
    let mut tracker = BreachTracker::new(3);
    assert_eq!(
        tracker.observe(&usage(95.0, 64), &LIMITS),
        BreachVerdict::Tolerated { consecutive: 1 }
    );
    assert_eq!(tracker.observe(&usage(10.0, 64), &LIMITS), BreachVerdict::Within);
    // The window starts over after a clean sample.
    assert_eq!(
        tracker.observe(&usage(95.0, 64), &LIMITS),
        BreachVerdict::Tolerated { consecutive: 1 }
    );
}

#[test]
fn test_sustained_memory_breach() {
    let mut tracker = BreachTracker::new(3);
    tracker.observe(&usage(1.0, 300), &LIMITS);
    tracker.observe(&usage(1.0, 300), &LIMITS);
    match tracker.observe(&usage(1.0, 300), &LIMITS) {
        BreachVerdict::Sustained(breach) => {
            assert_eq!(breach.resource, "memory");
            assert_eq!(breach.observed, "300MB");
            assert_eq!(breach.limit, "128MB");
        }
        other => panic!("expected sustained breach, got {:?}", other),
    }
}

#[test]
fn test_cpu_and_memory_breaches_share_the_window() {
    let mut tracker = BreachTracker::new(2);
    tracker.observe(&usage(99.0, 64), &LIMITS);
    match tracker.observe(&usage(1.0, 999), &LIMITS) {
        BreachVerdict::Sustained(breach) => assert_eq!(breach.resource, "memory"),
        other => panic!("expected sustained breach, got {:?}", other),
    }
}

#[test]
fn test_grace_never_drops_below_two_samples() {
    for grace in [0, 1] {
        let mut tracker = BreachTracker::new(grace);
        assert_eq!(
            tracker.observe(&usage(75.5, 64), &LIMITS),
            BreachVerdict::Tolerated { consecutive: 1 }
        );
        assert!(matches!(
            tracker.observe(&usage(75.5, 64), &LIMITS),
            BreachVerdict::Sustained(_)
        ));
    }
}

#[test]
fn test_reset_clears_window() {
    let mut tracker = BreachTracker::new(3);
    tracker.observe(&usage(99.0, 64), &LIMITS);
    tracker.observe(&usage(99.0, 64), &LIMITS);
    tracker.reset();
    assert_eq!(
        tracker.observe(&usage(99.0, 64), &LIMITS),
        BreachVerdict::Tolerated { consecutive: 1 }
    );
}
