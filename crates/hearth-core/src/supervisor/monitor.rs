use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

use crate::kernel::constants::MIN_BREACH_GRACE_TICKS;
use crate::plugin_system::manifest::ResourceLimits;

/// One CPU/memory sample of a plugin process
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Percent of one core
    pub cpu_percent: f32,
    pub memory_mb: u64,
}

/// Samples resource usage by PID
pub trait ResourceSampler: Send + Sync {
    /// `None` if the process cannot be observed.
    fn sample(&self, pid: u32) -> Option<ResourceUsage>;
}

/// [`ResourceSampler`] backed by `sysinfo`
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl fmt::Debug for SysinfoSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysinfoSampler").finish_non_exhaustive()
    }
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self, pid: u32) -> Option<ResourceUsage> {
        let mut system = self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let pid = Pid::from_u32(pid);
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| ResourceUsage {
            cpu_percent: process.cpu_usage(),
            memory_mb: process.memory() / 1024 / 1024,
        })
    }
}

/// The limit a sample went over
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub resource: &'static str,
    pub observed: String,
    pub limit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BreachVerdict {
    Within,
    /// Over a limit, but still inside the grace window
    Tolerated { consecutive: u32 },
    /// Over a limit for the whole grace window
    Sustained(Breach),
}

/// Counts consecutive over-limit samples. A single spike is always tolerated;
/// only `grace_ticks` samples in a row (never fewer than two) trip the limit.
#[derive(Debug, Clone)]
pub struct BreachTracker {
    grace_ticks: u32,
    consecutive: u32,
}

impl BreachTracker {
    pub fn new(grace_ticks: u32) -> Self {
        Self {
            grace_ticks: grace_ticks.max(MIN_BREACH_GRACE_TICKS),
            consecutive: 0,
        }
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn observe(&mut self, usage: &ResourceUsage, limits: &ResourceLimits) -> BreachVerdict {
        let breach = if usage.memory_mb > limits.memory_mb {
            Some(Breach {
                resource: "memory",
                observed: format!("{}MB", usage.memory_mb),
                limit: format!("{}MB", limits.memory_mb),
            })
        } else if usage.cpu_percent > limits.cpu_percent as f32 {
            Some(Breach {
                resource: "cpu",
                observed: format!("{:.1}%", usage.cpu_percent),
                limit: format!("{}%", limits.cpu_percent),
            })
        } else {
            None
        };

        match breach {
            None => {
                self.consecutive = 0;
                BreachVerdict::Within
            }
            Some(breach) => {
                self.consecutive += 1;
                if self.consecutive >= self.grace_ticks {
                    BreachVerdict::Sustained(breach)
                } else {
                    BreachVerdict::Tolerated {
                        consecutive: self.consecutive,
                    }
                }
            }
        }
    }
}
