use super::CollaboratorError;
use async_trait::async_trait;
use event_schema::ParticipantRole;
use parking_lot::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_new_message(
        &self,
        recipient_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
        sender_role: ParticipantRole,
    ) -> Result<(), CollaboratorError>;

    /// Withdraw anything pending for `message_id` once the recipient read it.
    async fn clear_for_message(
        &self,
        recipient_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), CollaboratorError>;

    async fn remind_unread(
        &self,
        recipient_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), CollaboratorError>;
}

/// Writes notifications to the log. Default when no provider is wired in.
#[derive(Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify_new_message(
        &self,
        recipient_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
        sender_role: ParticipantRole,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(
            recipient_id = %recipient_id,
            conversation_id = %conversation_id,
            message_id = %message_id,
            sender_role = %sender_role,
            "new message notification"
        );
        Ok(())
    }

    async fn clear_for_message(
        &self,
        recipient_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), CollaboratorError> {
        tracing::debug!(recipient_id = %recipient_id, message_id = %message_id, "notification cleared");
        Ok(())
    }

    async fn remind_unread(
        &self,
        recipient_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(
            recipient_id = %recipient_id,
            conversation_id = %conversation_id,
            message_id = %message_id,
            "unread message reminder"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationRecord {
    NewMessage {
        recipient_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    },
    Cleared {
        recipient_id: Uuid,
        message_id: Uuid,
    },
    Reminder {
        recipient_id: Uuid,
        message_id: Uuid,
    },
}

/// Records every call. Can be switched to fail for exercising the
/// best-effort paths.
#[derive(Default)]
pub struct InMemoryNotificationSink {
    records: Mutex<Vec<NotificationRecord>>,
    failing: Mutex<bool>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.records.lock().clone()
    }

    fn record(&self, record: NotificationRecord) -> Result<(), CollaboratorError> {
        if *self.failing.lock() {
            return Err(CollaboratorError::Unavailable("notification sink down".into()));
        }
        self.records.lock().push(record);
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn notify_new_message(
        &self,
        recipient_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
        _sender_role: ParticipantRole,
    ) -> Result<(), CollaboratorError> {
        self.record(NotificationRecord::NewMessage {
            recipient_id,
            conversation_id,
            message_id,
        })
    }

    async fn clear_for_message(
        &self,
        recipient_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), CollaboratorError> {
        self.record(NotificationRecord::Cleared {
            recipient_id,
            message_id,
        })
    }

    async fn remind_unread(
        &self,
        recipient_id: Uuid,
        _conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), CollaboratorError> {
        self.record(NotificationRecord::Reminder {
            recipient_id,
            message_id,
        })
    }
}
