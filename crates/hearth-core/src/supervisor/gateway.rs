//! Capability-gated forwarding of plugin requests.
//!
//! A plugin asks the runtime to act on its behalf by sending
//! `{"op": "publish"|"request", "subject": .., "payload": ..}` to its private
//! `rpc` subject. The gateway derives the capability the target subject needs,
//! consults the [`PermissionEnforcer`], and either forwards the operation or
//! answers with a `permission_denied` error. A denial never affects the process.
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::subject::{subject_matches, validate_subject};
use crate::bus::{BusMessage, MessageBus, PluginSubjects};
use crate::event::LifecycleEvent;
use crate::kernel::constants::{INBOX_PREFIX, PLUGIN_SUBJECT_ROOT};
use crate::permission::{names, Capability, Decision, PermissionEnforcer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayOp {
    Publish,
    Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub op: GatewayOp,
    pub subject: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    PermissionDenied,
    BadRequest,
    BusError,
    /// Too many requests of this plugin are still in flight
    Overloaded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayErrorBody {
    pub kind: GatewayErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GatewayErrorBody>,
}

impl GatewayReply {
    pub fn ok(payload: Option<Value>) -> Self {
        Self { ok: true, payload, error: None }
    }

    pub fn error(kind: GatewayErrorKind, message: impl Into<String>, capability: Option<&Capability>) -> Self {
        Self {
            ok: false,
            payload: None,
            error: Some(GatewayErrorBody {
                kind,
                message: message.into(),
                capability: capability.map(|c| c.to_string()),
            }),
        }
    }
}

/// A request the enforcer refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub capability: Capability,
    pub subject: String,
}

const SUBJECT_RULES: &[(&str, &str)] = &[
    ("chat.outbound.>", names::CHAT_SEND),
    ("storage.kv.get.>", names::STORAGE_KV_READ),
    ("storage.kv.set.>", names::STORAGE_KV_WRITE),
    ("storage.kv.delete.>", names::STORAGE_KV_WRITE),
    ("storage.row.query.>", names::STORAGE_ROW_READ),
    ("storage.row.insert.>", names::STORAGE_ROW_WRITE),
    ("storage.row.update.>", names::STORAGE_ROW_WRITE),
    ("storage.row.delete.>", names::STORAGE_ROW_WRITE),
    ("storage.sql.query.>", names::STORAGE_SQL_READ),
    ("storage.sql.execute.>", names::STORAGE_SQL_WRITE),
    ("storage.migrate.>", names::STORAGE_MIGRATE),
    ("permission.>", names::SYSTEM_ADMIN),
    ("admin.>", names::SYSTEM_ADMIN),
];

/// The capability a plugin needs to perform `op` on `subject`.
pub fn required_capability(subjects: &PluginSubjects, op: GatewayOp, subject: &str) -> Capability {
    if LifecycleEvent::all_subjects().contains(&subject) || subject_matches(&format!("{}.>", INBOX_PREFIX), subject) {
        return Capability::new(names::SYSTEM_ADMIN);
    }
    let foreign_namespace = subject_matches(&format!("{}.*.>", PLUGIN_SUBJECT_ROOT), subject) && !subjects.owns(subject);
    if foreign_namespace {
        return Capability::new(names::PLUGIN_CROSS_PUBLISH);
    }
    if let Some((_, capability)) = SUBJECT_RULES.iter().find(|(pattern, _)| subject_matches(pattern, subject)) {
        return Capability::new(capability);
    }
    match op {
        GatewayOp::Publish => Capability::new(names::BUS_PUBLISH),
        GatewayOp::Request => Capability::new(names::BUS_REQUEST),
    }
}

/// Serves one plugin's `rpc` subject
#[derive(Clone)]
pub struct RequestGateway {
    subjects: PluginSubjects,
    bus: Arc<dyn MessageBus>,
    enforcer: Arc<PermissionEnforcer>,
    request_timeout: Duration,
}

impl RequestGateway {
    pub fn new(
        subjects: PluginSubjects,
        bus: Arc<dyn MessageBus>,
        enforcer: Arc<PermissionEnforcer>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            subjects,
            bus,
            enforcer,
            request_timeout,
        }
    }

    /// Authorize and forward one request, then answer on its `reply_to`.
    /// Returns the denial, if the enforcer refused it.
    pub async fn serve(&self, message: BusMessage) -> Option<Denial> {
        let plugin = self.subjects.plugin();
        let (reply, denial) = match serde_json::from_value::<GatewayRequest>(message.payload.clone()) {
            Err(e) => (
                GatewayReply::error(GatewayErrorKind::BadRequest, format!("malformed request: {}", e), None),
                None,
            ),
            Ok(request) => self.authorize_and_forward(plugin, request).await,
        };

        self.answer(&message, &reply).await;
        denial
    }

    /// Refuse a request without looking at it.
    pub async fn refuse_overloaded(&self, message: &BusMessage) {
        let reply = GatewayReply::error(
            GatewayErrorKind::Overloaded,
            format!("too many requests in flight for plugin '{}'", self.subjects.plugin()),
            None,
        );
        self.answer(message, &reply).await;
    }

    async fn answer(&self, message: &BusMessage, reply: &GatewayReply) {
        let plugin = self.subjects.plugin();
        match message.reply_to.as_deref() {
            Some(reply_to) if self.subjects.owns(reply_to) => {
                match BusMessage::from_serializable(reply_to, reply) {
                    Ok(answer) => {
                        if let Err(e) = self.bus.publish(answer).await {
                            log::warn!("Failed to answer request of plugin '{}': {}", plugin, e);
                        }
                    }
                    Err(e) => log::warn!("Failed to encode reply for plugin '{}': {}", plugin, e),
                }
            }
            Some(reply_to) => log::warn!("Plugin '{}' asked for a reply on foreign subject '{}'", plugin, reply_to),
            None => {}
        }
    }

    async fn authorize_and_forward(&self, plugin: &str, request: GatewayRequest) -> (GatewayReply, Option<Denial>) {
        if let Err(e) = validate_subject(&request.subject) {
            return (GatewayReply::error(GatewayErrorKind::BadRequest, e.to_string(), None), None);
        }

        let capability = required_capability(&self.subjects, request.op, &request.subject);
        if self.enforcer.check(plugin, &capability) == Decision::Deny {
            log::warn!(
                "Denied {:?} on '{}' for plugin '{}' (needs {})",
                request.op,
                request.subject,
                plugin,
                capability
            );
            let reply = GatewayReply::error(
                GatewayErrorKind::PermissionDenied,
                format!("capability '{}' is required for '{}'", capability, request.subject),
                Some(&capability),
            );
            let denial = Denial {
                capability,
                subject: request.subject,
            };
            return (reply, Some(denial));
        }

        let result = match request.op {
            GatewayOp::Publish => self
                .bus
                .publish(BusMessage::new(&request.subject, request.payload))
                .await
                .map(|_| None),
            GatewayOp::Request => self
                .bus
                .request(&request.subject, request.payload, self.request_timeout)
                .await
                .map(|reply| Some(reply.payload)),
        };
        match result {
            Ok(payload) => (GatewayReply::ok(payload), None),
            Err(e) => (GatewayReply::error(GatewayErrorKind::BusError, e.to_string(), None), None),
        }
    }
}
