use std::time::Duration;

use crate::plugin_system::manifest::RestartPolicy;
use crate::supervisor::RestartSchedule;

fn policy(max_retries: u32, base: u64, factor: f64, cap: u64) -> RestartPolicy {
    RestartPolicy {
        max_retries,
        backoff_base_ms: base,
        backoff_factor: factor,
        backoff_cap_ms: cap,
    }
}

#[test]
fn test_delays_grow_exponentially() {
    let schedule = RestartSchedule::new(policy(3, 100, 2.0, 2000));
    assert_eq!(schedule.delay(1), Duration::from_millis(100));
    assert_eq!(schedule.delay(2), Duration::from_millis(200));
    assert_eq!(schedule.delay(3), Duration::from_millis(400));
}

#[test]
fn test_delay_is_capped() {
    let schedule = RestartSchedule::new(policy(10, 100, 2.0, 2000));
    assert_eq!(schedule.delay(5), Duration::from_millis(1600));
    assert_eq!(schedule.delay(6), Duration::from_millis(2000));
    assert_eq!(schedule.delay(60), Duration::from_millis(2000));
    assert_eq!(schedule.delay(u32::MAX), Duration::from_millis(2000));
}

#[test]
fn test_constant_backoff_with_unit_factor() {
    let schedule = RestartSchedule::new(policy(3, 250, 1.0, 1000));
    assert_eq!(schedule.delay(1), schedule.delay(3));
}

#[test]
fn test_restart_budget() {
    let schedule = RestartSchedule::new(policy(3, 100, 2.0, 2000));
    assert!(schedule.allows_restart(0));
    assert!(schedule.allows_restart(2));
    assert!(!schedule.allows_restart(3));

    let never = RestartSchedule::new(policy(0, 100, 2.0, 2000));
    assert!(!never.allows_restart(0));
}

#[test]
fn test_healthy_run_threshold() {
    let schedule = RestartSchedule::new(policy(3, 100, 2.0, 2000));
    assert_eq!(schedule.healthy_run(), Duration::from_secs(1));
}
