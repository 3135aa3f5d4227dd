//! Bridge between a plugin's stdio and the bus.
//!
//! Each line on the plugin's stdout is a JSON frame
//! `{"subject": .., "reply_to": .., "payload": ..}`. A frame is published only
//! if its subject lies inside the plugin's own namespace or is a reply inbox
//! the plugin was handed on stdin. Messages on the plugin's control, inbox and
//! reply subjects are written to stdin as frames of the same shape.
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::subject::is_inbox;
use crate::bus::{BusError, BusMessage, MessageBus, PluginSubjects, Subscription};
use crate::kernel::constants::MAX_HANDED_INBOXES;

/// Reply inboxes a plugin was handed and has not answered yet.
///
/// Each inbox is single use. Past `capacity` the oldest unanswered inbox is
/// forgotten, so a plugin that never replies cannot grow the set.
#[derive(Debug)]
pub struct HandedInboxes {
    order: VecDeque<String>,
    live: HashSet<String>,
    capacity: usize,
}

impl HandedInboxes {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            live: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn hand(&mut self, inbox: &str) {
        if !self.live.insert(inbox.to_string()) {
            return;
        }
        self.order.push_back(inbox.to_string());
        while self.live.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.live.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn contains(&self, inbox: &str) -> bool {
        self.live.contains(inbox)
    }

    /// Use up `inbox`; false if it was never handed or already used.
    pub fn take(&mut self, inbox: &str) -> bool {
        if !self.live.remove(inbox) {
            return false;
        }
        self.order.retain(|handed| handed != inbox);
        true
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl Default for HandedInboxes {
    fn default() -> Self {
        Self::new(MAX_HANDED_INBOXES)
    }
}

/// Whether a plugin may publish on `subject`
pub fn frame_allowed(subjects: &PluginSubjects, handed_inboxes: &HandedInboxes, subject: &str) -> bool {
    subjects.owns(subject) || (is_inbox(subject) && handed_inboxes.contains(subject))
}

/// Parse one stdout line into a frame; blank lines are ignored.
pub fn parse_frame(line: &str) -> Option<Result<BusMessage, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

pub struct StdioBridge {
    tasks: Vec<JoinHandle<()>>,
}

impl StdioBridge {
    /// Take the child's pipes and start the bridge tasks.
    pub async fn attach(
        child: &mut Child,
        bus: Arc<dyn MessageBus>,
        subjects: PluginSubjects,
    ) -> Result<Self, BusError> {
        let handed: Arc<Mutex<HandedInboxes>> = Arc::new(Mutex::new(HandedInboxes::default()));
        let mut tasks = Vec::new();

        if let Some(stdin) = child.stdin.take() {
            let subscriptions = vec![
                bus.subscribe(&subjects.control()).await?,
                bus.subscribe(&subjects.inbox()).await?,
                bus.subscribe(&subjects.replies()).await?,
            ];
            tasks.push(tokio::spawn(write_frames(stdin, subscriptions, handed.clone(), subjects.clone())));
        }

        if let Some(stdout) = child.stdout.take() {
            let bus = bus.clone();
            let subjects = subjects.clone();
            let handed = handed.clone();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match parse_frame(&line) {
                        None => {}
                        Some(Err(e)) => log::warn!("Plugin '{}' wrote a malformed frame: {}", subjects.plugin(), e),
                        Some(Ok(frame)) => {
                            let allowed = {
                                let mut inboxes = handed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                                let allowed = frame_allowed(&subjects, &inboxes, &frame.subject);
                                if allowed && is_inbox(&frame.subject) {
                                    inboxes.take(&frame.subject);
                                }
                                allowed
                            };
                            if !allowed {
                                log::warn!(
                                    "Plugin '{}' tried to publish outside its namespace on '{}'",
                                    subjects.plugin(),
                                    frame.subject
                                );
                                continue;
                            }
                            if let Err(e) = bus.publish(frame).await {
                                log::warn!("Failed to publish frame from '{}': {}", subjects.plugin(), e);
                            }
                        }
                    }
                }
                log::debug!("stdout of plugin '{}' closed", subjects.plugin());
            }));
        }

        if let Some(stderr) = child.stderr.take() {
            let plugin = subjects.plugin().to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("[{}] {}", plugin, line);
                }
            }));
        }

        Ok(Self { tasks })
    }

    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        self.tasks
    }
}

async fn write_frames(
    mut stdin: tokio::process::ChildStdin,
    subscriptions: Vec<Subscription>,
    handed: Arc<Mutex<HandedInboxes>>,
    subjects: PluginSubjects,
) {
    // Merge every subscription into one ordered stream.
    let (sender, mut merged) = mpsc::unbounded_channel::<BusMessage>();
    let mut forwarders = Vec::new();
    for mut subscription in subscriptions {
        let sender = sender.clone();
        forwarders.push(tokio::spawn(async move {
            while let Some(message) = subscription.next().await {
                if sender.send(message).is_err() {
                    break;
                }
            }
        }));
    }
    drop(sender);

    while let Some(message) = merged.recv().await {
        if let Some(reply_to) = &message.reply_to {
            if is_inbox(reply_to) {
                handed
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .hand(reply_to);
            }
        }
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                log::warn!("Failed to encode frame for '{}': {}", subjects.plugin(), e);
                continue;
            }
        };
        line.push('\n');
        if stdin.write_all(line.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
            log::debug!("stdin of plugin '{}' closed", subjects.plugin());
            break;
        }
    }
    for forwarder in forwarders {
        forwarder.abort();
    }
}
