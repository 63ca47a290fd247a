use crate::types::{AttachmentUpload, MessagePayload, MessageStatus, MessageType, ParticipantRole, PresenceStatus};
use crate::ProtocolError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `message:send`, also accepted by the REST send endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Correlates the `message:ack` reply. Absent means fire-and-forget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub conversation_id: Uuid,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentUpload>,
}

/// Outcome of an acknowledged send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAck {
    pub request_id: Option<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageAck {
    pub fn accepted(request_id: Option<String>, message: MessagePayload) -> Self {
        Self {
            request_id,
            ok: true,
            message: Some(message),
            error: None,
        }
    }

    pub fn rejected(request_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            request_id,
            ok: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    #[serde(rename = "join:thread")]
    JoinThread { conversation_id: Uuid },

    #[serde(rename = "leave:thread")]
    LeaveThread { conversation_id: Uuid },

    #[serde(rename = "message:send")]
    SendMessage(SendMessageRequest),

    #[serde(rename = "typing:start")]
    TypingStart { conversation_id: Uuid },

    #[serde(rename = "typing:stop")]
    TypingStop { conversation_id: Uuid },

    #[serde(rename = "message:delivered")]
    MessageDelivered { message_id: Uuid },

    #[serde(rename = "message:read")]
    MessageRead { message_id: Uuid },

    /// Catch-up request: everything created after `since`.
    #[serde(rename = "sync:request")]
    SyncRequest {
        conversation_id: Uuid,
        #[serde(default)]
        since: Option<DateTime<Utc>>,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate { .. } => "authenticate",
            ClientEvent::JoinThread { .. } => "join:thread",
            ClientEvent::LeaveThread { .. } => "leave:thread",
            ClientEvent::SendMessage(_) => "message:send",
            ClientEvent::TypingStart { .. } => "typing:start",
            ClientEvent::TypingStop { .. } => "typing:stop",
            ClientEvent::MessageDelivered { .. } => "message:delivered",
            ClientEvent::MessageRead { .. } => "message:read",
            ClientEvent::SyncRequest { .. } => "sync:request",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Frames the server emits, either to one connection or to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "authenticated")]
    Authenticated {
        actor_id: Uuid,
        role: ParticipantRole,
    },

    #[serde(rename = "auth:error")]
    AuthError { reason: String },

    #[serde(rename = "thread:joined")]
    ThreadJoined { conversation_id: Uuid },

    #[serde(rename = "thread:join:error")]
    ThreadJoinError {
        conversation_id: Uuid,
        reason: String,
    },

    #[serde(rename = "thread:left")]
    ThreadLeft { conversation_id: Uuid },

    /// Live or replayed message. Older clients send `message:received`.
    #[serde(rename = "message:new", alias = "message:received")]
    MessageNew { message: MessagePayload },

    #[serde(rename = "message:ack")]
    MessageAck(MessageAck),

    #[serde(rename = "typing:indicator")]
    TypingIndicator {
        conversation_id: Uuid,
        actor_id: Uuid,
        is_typing: bool,
    },

    #[serde(rename = "message:status:update")]
    MessageStatusUpdate {
        message_id: Uuid,
        conversation_id: Uuid,
        status: MessageStatus,
        actor_id: Uuid,
    },

    #[serde(rename = "user:status:change")]
    UserStatusChange {
        actor_id: Uuid,
        status: PresenceStatus,
        #[serde(default)]
        last_seen: Option<DateTime<Utc>>,
    },

    #[serde(rename = "sync:messages")]
    SyncMessages {
        conversation_id: Uuid,
        messages: Vec<MessagePayload>,
    },

    #[serde(rename = "error")]
    Error { reason: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Authenticated { .. } => "authenticated",
            ServerEvent::AuthError { .. } => "auth:error",
            ServerEvent::ThreadJoined { .. } => "thread:joined",
            ServerEvent::ThreadJoinError { .. } => "thread:join:error",
            ServerEvent::ThreadLeft { .. } => "thread:left",
            ServerEvent::MessageNew { .. } => "message:new",
            ServerEvent::MessageAck(_) => "message:ack",
            ServerEvent::TypingIndicator { .. } => "typing:indicator",
            ServerEvent::MessageStatusUpdate { .. } => "message:status:update",
            ServerEvent::UserStatusChange { .. } => "user:status:change",
            ServerEvent::SyncMessages { .. } => "sync:messages",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}
