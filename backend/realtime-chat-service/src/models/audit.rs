use chrono::{DateTime, Utc};
use event_schema::ParticipantRole;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessDecision {
    Granted,
    Denied,
    Error,
}

impl AccessDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessDecision::Granted => "granted",
            AccessDecision::Denied => "denied",
            AccessDecision::Error => "error",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "granted" => AccessDecision::Granted,
            "denied" => AccessDecision::Denied,
            _ => AccessDecision::Error,
        }
    }
}

/// What an access check is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTarget {
    Conversation(Uuid),
    Message(Uuid),
}

/// One authorization decision. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessAuditEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_role: ParticipantRole,
    pub conversation_id: Option<Uuid>,
    pub message_id: Option<Uuid>,
    pub decision: AccessDecision,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AccessAuditEntry {
    pub fn new(
        actor_id: Uuid,
        actor_role: ParticipantRole,
        target: AccessTarget,
        conversation_id: Option<Uuid>,
        decision: AccessDecision,
        reason: Option<String>,
    ) -> Self {
        let (conversation_id, message_id) = match target {
            AccessTarget::Conversation(id) => (Some(id), None),
            AccessTarget::Message(id) => (conversation_id, Some(id)),
        };
        Self {
            id: Uuid::new_v4(),
            actor_id,
            actor_role,
            conversation_id,
            message_id,
            decision,
            reason,
            created_at: Utc::now(),
        }
    }

    /// Emit on the dedicated security audit target.
    pub fn log(&self) {
        match self.decision {
            AccessDecision::Granted => tracing::debug!(
                target: "security_audit",
                actor_id = %self.actor_id,
                actor_role = %self.actor_role,
                conversation_id = ?self.conversation_id,
                message_id = ?self.message_id,
                decision = self.decision.as_str(),
                "access granted"
            ),
            AccessDecision::Denied => tracing::warn!(
                target: "security_audit",
                actor_id = %self.actor_id,
                actor_role = %self.actor_role,
                conversation_id = ?self.conversation_id,
                message_id = ?self.message_id,
                decision = self.decision.as_str(),
                reason = self.reason.as_deref().unwrap_or(""),
                "access denied"
            ),
            AccessDecision::Error => tracing::error!(
                target: "security_audit",
                actor_id = %self.actor_id,
                actor_role = %self.actor_role,
                conversation_id = ?self.conversation_id,
                message_id = ?self.message_id,
                decision = self.decision.as_str(),
                reason = self.reason.as_deref().unwrap_or(""),
                "access check failed"
            ),
        }
    }
}
