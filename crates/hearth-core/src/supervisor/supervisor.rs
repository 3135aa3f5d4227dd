//! Per-plugin supervisor actor.
//!
//! Each loaded plugin gets one [`Supervisor`] task that exclusively owns its
//! process. The manager drives it through a [`SupervisorHandle`]; everything
//! the supervisor decides on its own (crash restarts, resource breaches,
//! permission denials) is reported back as a [`SupervisorEvent`].
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::time::MissedTickBehavior;

use crate::bus::{BusMessage, MessageBus, PluginSubjects, Subscription};
use crate::config::SupervisorSettings;
use crate::kernel::constants::MAX_INFLIGHT_REQUESTS;
use crate::permission::{names, Capability, PermissionEnforcer};
use crate::plugin_system::manifest::PluginManifest;
use crate::supervisor::backoff::RestartSchedule;
use crate::supervisor::gateway::{GatewayErrorKind, GatewayReply, RequestGateway};
use crate::supervisor::monitor::{BreachTracker, BreachVerdict, ResourceSampler, ResourceUsage};
use crate::supervisor::process::{LaunchSpec, PluginProcess, ProcessExit, ProcessLauncher};
use crate::supervisor::SupervisorError;

/// Timings of one supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub startup_timeout: Duration,
    pub stop_timeout: Duration,
    pub monitor_interval: Duration,
    pub breach_grace_ticks: u32,
    pub request_timeout: Duration,
}

impl SupervisorConfig {
    /// Runtime-wide settings with the manifest's own timeouts taking precedence.
    pub fn for_manifest(settings: &SupervisorSettings, manifest: &PluginManifest) -> Self {
        Self {
            startup_timeout: manifest
                .startup_timeout_override()
                .unwrap_or_else(|| settings.startup_timeout()),
            stop_timeout: manifest.stop_timeout_override().unwrap_or_else(|| settings.stop_timeout()),
            monitor_interval: settings.monitor_interval(),
            breach_grace_ticks: settings.breach_grace_ticks,
            request_timeout: settings.request_timeout(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let settings = SupervisorSettings::default();
        Self {
            startup_timeout: settings.startup_timeout(),
            stop_timeout: settings.stop_timeout(),
            monitor_interval: settings.monitor_interval(),
            breach_grace_ticks: settings.breach_grace_ticks,
            request_timeout: settings.request_timeout(),
        }
    }
}

/// Collaborators shared by every supervisor
#[derive(Clone)]
pub struct SupervisorContext {
    pub bus: Arc<dyn MessageBus>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub sampler: Arc<dyn ResourceSampler>,
    pub enforcer: Arc<PermissionEnforcer>,
}

impl fmt::Debug for SupervisorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorContext").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The plugin exited after the shutdown request
    Stopped,
    /// The plugin ignored the shutdown request and was killed
    ForceKilled,
    AlreadyStopped,
}

/// What the supervisor reports to the manager on its own initiative
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Crashed {
        plugin: String,
        error: SupervisorError,
        restart_count: u32,
    },
    /// A restart attempt is about to launch after its backoff delay
    Restarting {
        plugin: String,
        attempt: u32,
        delay: Duration,
    },
    Restarted {
        plugin: String,
        pid: Option<u32>,
    },
    RestartFailed {
        plugin: String,
        error: SupervisorError,
    },
    Disabled {
        plugin: String,
        error: SupervisorError,
    },
    PermissionDenied {
        plugin: String,
        capability: String,
        subject: String,
    },
    ResourceSample {
        plugin: String,
        usage: ResourceUsage,
    },
}

impl SupervisorEvent {
    pub fn plugin(&self) -> &str {
        match self {
            SupervisorEvent::Crashed { plugin, .. }
            | SupervisorEvent::Restarting { plugin, .. }
            | SupervisorEvent::Restarted { plugin, .. }
            | SupervisorEvent::RestartFailed { plugin, .. }
            | SupervisorEvent::Disabled { plugin, .. }
            | SupervisorEvent::PermissionDenied { plugin, .. }
            | SupervisorEvent::ResourceSample { plugin, .. } => plugin,
        }
    }
}

/// Externally visible view of a supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: SupervisorState::Idle,
            pid: None,
            started_at: None,
            restart_count: 0,
            last_error: None,
        }
    }
}

enum SupervisorCommand {
    Start {
        reply: oneshot::Sender<Result<Option<u32>, SupervisorError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<StopOutcome, SupervisorError>>,
    },
    Shutdown,
}

/// Cloneable handle to one plugin's supervisor task
#[derive(Clone)]
pub struct SupervisorHandle {
    plugin: String,
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    status: watch::Receiver<SupervisorStatus>,
}

impl fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("plugin", &self.plugin)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl SupervisorHandle {
    /// Spawn the supervisor task for `manifest`. The task ends on
    /// [`shutdown`](Self::shutdown) or once every handle is dropped.
    pub fn spawn(
        manifest: Arc<PluginManifest>,
        config: SupervisorConfig,
        context: SupervisorContext,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        let plugin = manifest.name.clone();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::default());
        let subjects = PluginSubjects::new(&manifest.name);
        let gateway = RequestGateway::new(
            subjects.clone(),
            context.bus.clone(),
            context.enforcer.clone(),
            config.request_timeout,
        );

        let supervisor = Supervisor {
            plugin: manifest.name.clone(),
            spec: LaunchSpec::from_manifest(&manifest),
            schedule: RestartSchedule::new(manifest.restart_policy),
            tracker: BreachTracker::new(config.breach_grace_ticks),
            manifest,
            subjects,
            config,
            context,
            gateway,
            inflight: Arc::new(Semaphore::new(MAX_INFLIGHT_REQUESTS)),
            events,
            commands: command_rx,
            status: status_tx,
            current: SupervisorStatus::default(),
            process: None,
            run_started: None,
            rpc: None,
            relay: None,
            closing: false,
        };
        tokio::spawn(supervisor.run());

        Self {
            plugin,
            commands: command_tx,
            status: status_rx,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Launch the plugin and wait for its health handshake. Resolves to the
    /// process id. An explicit start resets the restart counter.
    pub async fn start(&self) -> Result<Option<u32>, SupervisorError> {
        let (reply, response) = oneshot::channel();
        self.send(SupervisorCommand::Start { reply })?;
        response.await.map_err(|_| self.unavailable())?
    }

    /// Gracefully stop the plugin. Idempotent.
    pub async fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let (reply, response) = oneshot::channel();
        self.send(SupervisorCommand::Stop { reply })?;
        response.await.map_err(|_| self.unavailable())?
    }

    /// End the supervisor task, killing any live process.
    pub fn shutdown(&self) {
        let _ = self.commands.send(SupervisorCommand::Shutdown);
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    fn send(&self, command: SupervisorCommand) -> Result<(), SupervisorError> {
        self.commands.send(command).map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> SupervisorError {
        SupervisorError::Unavailable {
            plugin: self.plugin.clone(),
        }
    }
}

struct Supervisor {
    plugin: String,
    manifest: Arc<PluginManifest>,
    subjects: PluginSubjects,
    spec: LaunchSpec,
    config: SupervisorConfig,
    context: SupervisorContext,
    schedule: RestartSchedule,
    tracker: BreachTracker,
    gateway: RequestGateway,
    inflight: Arc<Semaphore>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    commands: mpsc::UnboundedReceiver<SupervisorCommand>,
    status: watch::Sender<SupervisorStatus>,
    current: SupervisorStatus,
    process: Option<Box<dyn PluginProcess>>,
    run_started: Option<Instant>,
    rpc: Option<Subscription>,
    relay: Option<Subscription>,
    closing: bool,
}

/// Subscriptions that are live only while the plugin runs
struct RunningSubscriptions {
    rpc: Subscription,
    relay: Subscription,
}

async fn wait_exit(process: &mut Option<Box<dyn PluginProcess>>) -> ProcessExit {
    match process {
        Some(process) => process.wait().await,
        None => std::future::pending().await,
    }
}

async fn next_message(subscription: &mut Option<Subscription>) -> Option<BusMessage> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

impl Supervisor {
    async fn run(mut self) {
        let mut monitor = tokio::time::interval(self.config.monitor_interval);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !self.closing {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SupervisorCommand::Start { reply }) => {
                        let result = self.handle_start().await;
                        let _ = reply.send(result);
                    }
                    Some(SupervisorCommand::Stop { reply }) => {
                        let result = self.handle_stop().await;
                        let _ = reply.send(result);
                    }
                    Some(SupervisorCommand::Shutdown) | None => self.closing = true,
                },
                exit = wait_exit(&mut self.process) => {
                    self.process = None;
                    let error = SupervisorError::ProcessCrash {
                        plugin: self.plugin.clone(),
                        exit,
                    };
                    self.handle_failure(error).await;
                }
                _ = monitor.tick() => self.sample().await,
                message = next_message(&mut self.rpc) => match message {
                    Some(message) => self.serve_request(message).await,
                    None => self.rpc = None,
                },
                message = next_message(&mut self.relay) => match message {
                    Some(message) => self.relay_command(message).await,
                    None => self.relay = None,
                },
            }
        }

        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.kill().await {
                log::warn!("{}", e);
            }
            let _ = tokio::time::timeout(self.config.stop_timeout, process.wait()).await;
        }
        self.current.pid = None;
        if self.current.state != SupervisorState::Disabled {
            self.current.state = SupervisorState::Stopped;
        }
        self.publish_status();
        log::debug!("Supervisor of '{}' finished", self.plugin);
    }

    fn publish_status(&self) {
        self.status.send_replace(self.current.clone());
    }

    fn set_state(&mut self, state: SupervisorState) {
        log::trace!("Supervisor '{}': {:?} -> {:?}", self.plugin, self.current.state, state);
        self.current.state = state;
        self.publish_status();
    }

    fn emit(&self, event: SupervisorEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Manager stopped listening to supervisor '{}'", self.plugin);
        }
    }

    async fn handle_start(&mut self) -> Result<Option<u32>, SupervisorError> {
        if self.current.state == SupervisorState::Running {
            return Ok(self.current.pid);
        }
        self.current.restart_count = 0;
        self.current.last_error = None;
        self.launch().await
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, SupervisorError> {
        self.context.bus.subscribe(subject).await.map_err(|e| SupervisorError::Bus {
            plugin: self.plugin.clone(),
            message: e.to_string(),
        })
    }

    /// The rpc and command subjects get a responder only once the plugin is ready.
    async fn subscribe_running(&self) -> Result<RunningSubscriptions, SupervisorError> {
        Ok(RunningSubscriptions {
            rpc: self.subscribe(&self.subjects.rpc()).await?,
            relay: self.subscribe(&self.subjects.command()).await?,
        })
    }

    /// Spawn the process and wait for its ready message.
    async fn launch(&mut self) -> Result<Option<u32>, SupervisorError> {
        self.set_state(SupervisorState::Starting);
        let result = self.spawn_until_ready().await;
        match result {
            Ok((process, subscriptions)) => {
                let pid = process.id();
                self.process = Some(process);
                self.rpc = Some(subscriptions.rpc);
                self.relay = Some(subscriptions.relay);
                self.run_started = Some(Instant::now());
                self.tracker.reset();
                self.current.pid = pid;
                self.current.started_at = Some(Utc::now());
                self.set_state(SupervisorState::Running);
                log::info!("Plugin '{}' is running (pid {:?})", self.plugin, pid);
                Ok(pid)
            }
            Err(error) => {
                log::warn!("{}", error);
                self.current.pid = None;
                self.current.last_error = Some(error.to_string());
                self.set_state(SupervisorState::Stopped);
                Err(error)
            }
        }
    }

    async fn spawn_until_ready(
        &mut self,
    ) -> Result<(Box<dyn PluginProcess>, RunningSubscriptions), SupervisorError> {
        // Subscribe first so a fast plugin cannot announce itself unheard.
        let mut ready = self.subscribe(&self.subjects.ready()).await?;
        let mut process = self.context.launcher.spawn(&self.spec).await?;

        let deadline = tokio::time::sleep(self.config.startup_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                announced = ready.next() => {
                    return match announced {
                        Some(_) => match self.subscribe_running().await {
                            Ok(subscriptions) => Ok((process, subscriptions)),
                            Err(error) => {
                                kill_and_reap(&mut process, self.config.stop_timeout).await;
                                Err(error)
                            }
                        },
                        None => {
                            kill_and_reap(&mut process, self.config.stop_timeout).await;
                            Err(SupervisorError::Bus {
                                plugin: self.plugin.clone(),
                                message: "ready subscription closed".to_string(),
                            })
                        }
                    };
                }
                exit = process.wait() => {
                    return Err(SupervisorError::StartFailed {
                        plugin: self.plugin.clone(),
                        exit,
                    });
                }
                _ = &mut deadline => {
                    kill_and_reap(&mut process, self.config.stop_timeout).await;
                    return Err(SupervisorError::StartTimeout {
                        plugin: self.plugin.clone(),
                        timeout_ms: self.config.startup_timeout.as_millis() as u64,
                    });
                }
                command = self.commands.recv() => match command {
                    Some(SupervisorCommand::Stop { reply }) => {
                        log::info!("Stop requested while '{}' was starting", self.plugin);
                        kill_and_reap(&mut process, self.config.stop_timeout).await;
                        let _ = reply.send(Ok(StopOutcome::Stopped));
                        return Err(SupervisorError::Cancelled { plugin: self.plugin.clone() });
                    }
                    Some(SupervisorCommand::Start { reply }) => {
                        let _ = reply.send(Err(SupervisorError::Busy { plugin: self.plugin.clone() }));
                    }
                    Some(SupervisorCommand::Shutdown) | None => {
                        self.closing = true;
                        kill_and_reap(&mut process, self.config.stop_timeout).await;
                        return Err(SupervisorError::Cancelled { plugin: self.plugin.clone() });
                    }
                },
            }
        }
    }

    async fn handle_stop(&mut self) -> Result<StopOutcome, SupervisorError> {
        let Some(mut process) = self.process.take() else {
            if !matches!(self.current.state, SupervisorState::Disabled | SupervisorState::Stopped) {
                self.set_state(SupervisorState::Stopped);
            }
            return Ok(StopOutcome::AlreadyStopped);
        };
        self.set_state(SupervisorState::Stopping);
        self.leave_running();

        let shutdown = BusMessage::new(&self.subjects.control(), json!({ "command": "shutdown" }));
        if let Err(e) = self.context.bus.publish(shutdown).await {
            log::warn!("Failed to ask plugin '{}' to shut down: {}", self.plugin, e);
        }

        let outcome = match tokio::time::timeout(self.config.stop_timeout, process.wait()).await {
            Ok(exit) => {
                log::info!("Plugin '{}' stopped ({})", self.plugin, exit);
                Ok(StopOutcome::Stopped)
            }
            Err(_) => {
                log::warn!(
                    "Plugin '{}' ignored shutdown for {}ms; killing it",
                    self.plugin,
                    self.config.stop_timeout.as_millis()
                );
                match process.kill().await {
                    Ok(()) => {
                        let _ = tokio::time::timeout(self.config.stop_timeout, process.wait()).await;
                        Ok(StopOutcome::ForceKilled)
                    }
                    Err(e) => Err(e),
                }
            }
        };
        self.current.pid = None;
        self.set_state(SupervisorState::Stopped);
        outcome
    }

    fn leave_running(&mut self) {
        self.rpc = None;
        self.relay = None;
        self.run_started = None;
    }

    /// Account for a crash or breach, then disable or restart after backoff.
    async fn handle_failure(&mut self, error: SupervisorError) {
        let ran_for = self.run_started.map(|started| started.elapsed()).unwrap_or_default();
        self.leave_running();
        self.current.pid = None;
        if ran_for >= self.schedule.healthy_run() {
            self.current.restart_count = 0;
        }
        self.current.last_error = Some(error.to_string());
        self.set_state(SupervisorState::Crashed);
        log::warn!("{} (restart {}/{})", error, self.current.restart_count, self.schedule.max_retries());
        self.emit(SupervisorEvent::Crashed {
            plugin: self.plugin.clone(),
            error: error.clone(),
            restart_count: self.current.restart_count,
        });

        if !self.schedule.allows_restart(self.current.restart_count) {
            log::error!("Plugin '{}' exhausted its restart budget; disabling", self.plugin);
            self.set_state(SupervisorState::Disabled);
            self.emit(SupervisorEvent::Disabled {
                plugin: self.plugin.clone(),
                error,
            });
            return;
        }

        self.current.restart_count += 1;
        self.publish_status();
        let attempt = self.current.restart_count;
        let delay = self.schedule.delay(attempt);

        let backoff = tokio::time::sleep(delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                _ = &mut backoff => break,
                command = self.commands.recv() => match command {
                    Some(SupervisorCommand::Stop { reply }) => {
                        self.set_state(SupervisorState::Stopped);
                        let _ = reply.send(Ok(StopOutcome::AlreadyStopped));
                        return;
                    }
                    Some(SupervisorCommand::Start { reply }) => {
                        let result = self.handle_start().await;
                        let _ = reply.send(result);
                        return;
                    }
                    Some(SupervisorCommand::Shutdown) | None => {
                        self.closing = true;
                        return;
                    }
                },
            }
        }

        self.emit(SupervisorEvent::Restarting {
            plugin: self.plugin.clone(),
            attempt,
            delay,
        });
        match self.launch().await {
            Ok(pid) => self.emit(SupervisorEvent::Restarted {
                plugin: self.plugin.clone(),
                pid,
            }),
            Err(SupervisorError::Cancelled { .. }) => {}
            Err(error) => self.emit(SupervisorEvent::RestartFailed {
                plugin: self.plugin.clone(),
                error,
            }),
        }
    }

    async fn sample(&mut self) {
        if self.current.state != SupervisorState::Running {
            return;
        }
        let Some(pid) = self.current.pid else {
            return;
        };
        let Some(usage) = self.context.sampler.sample(pid) else {
            return;
        };
        self.emit(SupervisorEvent::ResourceSample {
            plugin: self.plugin.clone(),
            usage,
        });

        match self.tracker.observe(&usage, &self.manifest.resource_limits) {
            BreachVerdict::Within => {}
            BreachVerdict::Tolerated { consecutive } => {
                log::debug!("Plugin '{}' over its limits ({} consecutive samples)", self.plugin, consecutive);
            }
            BreachVerdict::Sustained(breach) => {
                if let Some(mut process) = self.process.take() {
                    kill_and_reap(&mut process, self.config.stop_timeout).await;
                }
                let error = SupervisorError::ResourceLimitExceeded {
                    plugin: self.plugin.clone(),
                    resource: breach.resource.to_string(),
                    observed: breach.observed,
                    limit: breach.limit,
                };
                self.handle_failure(error).await;
            }
        }
    }

    async fn serve_request(&self, message: BusMessage) {
        let Ok(permit) = self.inflight.clone().try_acquire_owned() else {
            log::warn!(
                "Plugin '{}' has {} requests in flight; refusing another",
                self.plugin,
                MAX_INFLIGHT_REQUESTS
            );
            self.gateway.refuse_overloaded(&message).await;
            return;
        };
        let gateway = self.gateway.clone();
        let events = self.events.clone();
        let plugin = self.plugin.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Some(denial) = gateway.serve(message).await {
                let _ = events.send(SupervisorEvent::PermissionDenied {
                    plugin,
                    capability: denial.capability.to_string(),
                    subject: denial.subject,
                });
            }
        });
    }

    /// Forward a routed chat command to the plugin's inbox.
    async fn relay_command(&mut self, message: BusMessage) {
        let capability = Capability::new(names::COMMAND_RECEIVE);
        if self.context.enforcer.check(&self.plugin, &capability).is_allowed() {
            let mut forwarded = BusMessage::new(&self.subjects.inbox(), message.payload);
            if let Some(reply_to) = &message.reply_to {
                forwarded = forwarded.with_reply_to(reply_to);
            }
            if let Err(e) = self.context.bus.publish(forwarded).await {
                log::warn!("Failed to relay command to '{}': {}", self.plugin, e);
            }
            return;
        }

        self.emit(SupervisorEvent::PermissionDenied {
            plugin: self.plugin.clone(),
            capability: capability.to_string(),
            subject: message.subject.clone(),
        });
        if let Some(reply_to) = &message.reply_to {
            let reply = GatewayReply::error(
                GatewayErrorKind::PermissionDenied,
                format!("plugin '{}' may not receive commands", self.plugin),
                Some(&capability),
            );
            match BusMessage::from_serializable(reply_to, &reply) {
                Ok(answer) => {
                    if let Err(e) = self.context.bus.publish(answer).await {
                        log::warn!("Failed to answer denied command for '{}': {}", self.plugin, e);
                    }
                }
                Err(e) => log::warn!("{}", e),
            }
        }
    }
}

async fn kill_and_reap(process: &mut Box<dyn PluginProcess>, bound: Duration) {
    if let Err(e) = process.kill().await {
        log::warn!("{}", e);
    }
    if tokio::time::timeout(bound, process.wait()).await.is_err() {
        log::warn!("Process {:?} did not exit after being killed", process.id());
    }
}
