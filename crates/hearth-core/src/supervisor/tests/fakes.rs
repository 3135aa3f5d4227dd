//! In-memory stand-ins for plugin processes and resource sampling.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;

use crate::bus::{BusMessage, MessageBus};
use crate::supervisor::monitor::{ResourceSampler, ResourceUsage};
use crate::supervisor::process::{LaunchSpec, PluginProcess, ProcessExit, ProcessLauncher};
use crate::supervisor::SupervisorError;

/// How a fake plugin behaves once spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Announces readiness and exits on a shutdown request
    Healthy,
    /// Never announces readiness
    Silent,
    FailSpawn,
    /// Exits with code 1 before announcing readiness
    ExitBeforeReady,
    /// Announces readiness but ignores shutdown requests
    Unresponsive,
}

type ExitSender = Arc<watch::Sender<Option<ProcessExit>>>;

#[derive(Default)]
pub struct FakeLauncher {
    bus: Option<Arc<dyn MessageBus>>,
    behaviors: Mutex<HashMap<String, FakeBehavior>>,
    spawned: Mutex<Vec<String>>,
    stopped: Arc<Mutex<Vec<String>>>,
    exits: Mutex<HashMap<String, ExitSender>>,
    next_pid: AtomicU32,
}

impl FakeLauncher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus: Some(bus),
            next_pid: AtomicU32::new(1000),
            ..Self::default()
        }
    }

    pub fn set_behavior(&self, plugin: &str, behavior: FakeBehavior) {
        self.behaviors.lock().unwrap().insert(plugin.to_string(), behavior);
    }

    /// Every spawn, in order
    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn spawn_count(&self, plugin: &str) -> usize {
        self.spawned.lock().unwrap().iter().filter(|name| *name == plugin).count()
    }

    /// Plugins that exited on a shutdown request, in order
    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    /// Make the latest process of `plugin` exit with `code`.
    pub fn crash(&self, plugin: &str, code: i32) -> bool {
        match self.exits.lock().unwrap().get(plugin) {
            Some(exit) if exit.borrow().is_none() => {
                exit.send_replace(Some(ProcessExit::code(code)));
                true
            }
            _ => false,
        }
    }

    fn behavior_of(&self, plugin: &str) -> FakeBehavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(plugin)
            .copied()
            .unwrap_or(FakeBehavior::Healthy)
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn PluginProcess>, SupervisorError> {
        let behavior = self.behavior_of(&spec.plugin);
        if behavior == FakeBehavior::FailSpawn {
            return Err(SupervisorError::SpawnFailed {
                plugin: spec.plugin.clone(),
                message: "no such file or directory".to_string(),
            });
        }
        self.spawned.lock().unwrap().push(spec.plugin.clone());
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = watch::channel(None);
        let sender: ExitSender = Arc::new(sender);
        self.exits.lock().unwrap().insert(spec.plugin.clone(), sender.clone());

        let bus = self.bus.clone().expect("fake launcher needs a bus");
        match behavior {
            FakeBehavior::ExitBeforeReady => {
                sender.send_replace(Some(ProcessExit::code(1)));
            }
            FakeBehavior::Healthy | FakeBehavior::Unresponsive => {
                let mut control = bus.subscribe(&spec.subjects.control()).await.unwrap();
                let mut exited = receiver.clone();
                let exit = sender.clone();
                let stopped = self.stopped.clone();
                let plugin = spec.plugin.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            message = control.next() => {
                                let Some(message) = message else { break };
                                if behavior == FakeBehavior::Healthy && message.payload["command"] == "shutdown" {
                                    // A graceful exit takes a moment, like a real process.
                                    tokio::time::sleep(Duration::from_millis(5)).await;
                                    stopped.lock().unwrap().push(plugin.clone());
                                    exit.send_replace(Some(ProcessExit::code(0)));
                                    break;
                                }
                            }
                            changed = exited.changed() => {
                                if changed.is_err() || exited.borrow().is_some() {
                                    break;
                                }
                            }
                        }
                    }
                });
                bus.publish(BusMessage::new(&spec.subjects.ready(), json!({ "pid": pid })))
                    .await
                    .unwrap();
            }
            FakeBehavior::Silent | FakeBehavior::FailSpawn => {}
        }

        Ok(Box::new(FakeProcess {
            pid,
            exit: receiver,
            sender,
        }))
    }
}

pub struct FakeProcess {
    pid: u32,
    exit: watch::Receiver<Option<ProcessExit>>,
    sender: ExitSender,
}

#[async_trait]
impl PluginProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> ProcessExit {
        loop {
            let current = *self.exit.borrow_and_update();
            if let Some(exit) = current {
                return exit;
            }
            if self.exit.changed().await.is_err() {
                return ProcessExit::unknown();
            }
        }
    }

    async fn kill(&mut self) -> Result<(), SupervisorError> {
        if self.sender.borrow().is_none() {
            self.sender.send_replace(Some(ProcessExit::signal(9)));
        }
        Ok(())
    }
}

/// Reports whatever usage the test sets
#[derive(Default)]
pub struct FakeSampler {
    usage: Mutex<Option<ResourceUsage>>,
}

impl FakeSampler {
    pub fn set(&self, cpu_percent: f32, memory_mb: u64) {
        *self.usage.lock().unwrap() = Some(ResourceUsage { cpu_percent, memory_mb });
    }

    pub fn clear(&self) {
        *self.usage.lock().unwrap() = None;
    }
}

impl ResourceSampler for FakeSampler {
    fn sample(&self, _pid: u32) -> Option<ResourceUsage> {
        *self.usage.lock().unwrap()
    }
}
