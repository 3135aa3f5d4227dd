use std::time::Duration;

use crate::kernel::constants::HEALTHY_RUN_FACTOR;
use crate::plugin_system::manifest::RestartPolicy;

/// Restart delays derived from a [`RestartPolicy`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartSchedule {
    policy: RestartPolicy,
}

impl RestartSchedule {
    pub fn new(policy: RestartPolicy) -> Self {
        Self { policy }
    }

    pub fn max_retries(&self) -> u32 {
        self.policy.max_retries
    }

    /// Delay before restart attempt `attempt` (1-based):
    /// `min(cap, base * factor^(attempt - 1))`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.policy.backoff_base_ms as f64 * self.policy.backoff_factor.powi(exponent);
        let cap = self.policy.backoff_cap_ms as f64;
        let millis = if raw.is_finite() { raw.min(cap) } else { cap };
        Duration::from_millis(millis.round() as u64)
    }

    /// Whether another restart is allowed after `restart_count` attempts
    pub fn allows_restart(&self, restart_count: u32) -> bool {
        restart_count < self.policy.max_retries
    }

    /// A run at least this long resets the restart counter
    pub fn healthy_run(&self) -> Duration {
        Duration::from_millis(self.policy.backoff_base_ms.saturating_mul(u64::from(HEALTHY_RUN_FACTOR)))
    }
}
