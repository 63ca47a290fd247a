use super::{CollaboratorError, NotificationSink};
use crate::storage::ChatStore;
use async_trait::async_trait;
use dashmap::DashMap;
use event_schema::MessageStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadReminder {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub recipient_id: Uuid,
    pub delay: Duration,
}

#[async_trait]
pub trait ReminderScheduler: Send + Sync {
    async fn schedule(&self, reminder: UnreadReminder) -> Result<(), CollaboratorError>;

    /// Returns true if a pending reminder was dropped.
    async fn cancel(&self, message_id: Uuid) -> bool;
}

/// Fires reminders from tokio timers. A reminder only goes out if the
/// message is still unread and not deleted when the timer expires.
pub struct TokioReminderScheduler {
    store: Arc<dyn ChatStore>,
    notifications: Arc<dyn NotificationSink>,
    pending: Arc<DashMap<Uuid, AbortHandle>>,
}

impl TokioReminderScheduler {
    pub fn new(store: Arc<dyn ChatStore>, notifications: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            notifications,
            pending: Arc::new(DashMap::new()),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl ReminderScheduler for TokioReminderScheduler {
    async fn schedule(&self, reminder: UnreadReminder) -> Result<(), CollaboratorError> {
        let store = self.store.clone();
        let notifications = self.notifications.clone();
        let pending = self.pending.clone();
        let message_id = reminder.message_id;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(reminder.delay).await;
            pending.remove(&message_id);

            let still_unread = match store.find_message(message_id).await {
                Ok(Some(message)) => !message.is_deleted && message.status != MessageStatus::Read,
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(message_id = %message_id, error = %e, "reminder lookup failed");
                    false
                }
            };
            if !still_unread {
                return;
            }
            if let Err(e) = notifications
                .remind_unread(reminder.recipient_id, reminder.conversation_id, message_id)
                .await
            {
                tracing::warn!(message_id = %message_id, error = %e, "unread reminder failed");
            }
        });

        if let Some(previous) = self.pending.insert(message_id, handle.abort_handle()) {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel(&self, message_id: Uuid) -> bool {
        match self.pending.remove(&message_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}
