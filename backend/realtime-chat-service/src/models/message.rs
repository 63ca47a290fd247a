use chrono::{DateTime, Utc};
use event_schema::{MessagePayload, MessageStatus, MessageType, ParticipantRole};
use serde::Serialize;
use uuid::Uuid;

/// Message row as persisted. `envelope` is the encrypted body and is never
/// rewritten after insert; only `status` and the delete fields change.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: ParticipantRole,
    pub envelope: String,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_role: ParticipantRole,
        envelope: String,
        message_type: MessageType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            sender_role,
            envelope,
            message_type,
            status: MessageStatus::Sent,
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    /// Combine with decrypted content into the client-facing payload.
    pub fn into_payload(self, content: String, decryption_failed: bool) -> MessagePayload {
        MessagePayload {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            sender_role: self.sender_role,
            content,
            message_type: self.message_type,
            status: self.status,
            created_at: self.created_at,
            attachments: Vec::new(),
            decryption_failed,
            failed_attachments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<MessagePayload>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}
