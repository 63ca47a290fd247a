//! Message lifecycle orchestration.
//!
//! Every operation authorizes through [`AccessController`] first and only
//! ever hands plaintext back to the caller; envelopes stay in storage.

use super::content::{normalize_query, validate_content};
use super::{bounded, AccessController};
use crate::collaborators::{CollaboratorError, Collaborators, UnreadReminder};
use crate::config::Config;
use crate::error::{AppError, AppResult, REASON_MESSAGE_NOT_FOUND, REASON_NOT_SENDER};
use crate::models::{
    AccessTarget, Actor, Conversation, ConversationSummary, MessagePage, StoredMessage,
};
use crate::storage::{ChatStore, StorageError};
use chrono::{DateTime, Utc};
use crypto_core::MessageCipher;
use dashmap::DashMap;
use event_schema::{
    AttachmentUpload, MessagePayload, MessageStatus, MessageType, ParticipantRole,
    SendMessageRequest,
};
use resilience::{collaborator_config, with_retry, with_timeout};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DECRYPTION_PLACEHOLDER: &str = "[Message could not be decrypted]";

const LIST_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub message_max_length: usize,
    pub page_max: i64,
    pub reminder_delay: Duration,
    pub timeout: Duration,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            message_max_length: config.message_max_length,
            page_max: config.message_page_max.max(1),
            reminder_delay: config.reminder_delay,
            timeout: config.collaborator_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessage {
    pub conversation_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Vec<AttachmentUpload>,
}

impl From<SendMessageRequest> for SendMessage {
    fn from(req: SendMessageRequest) -> Self {
        Self {
            conversation_id: req.conversation_id,
            content: req.content,
            message_type: req.message_type,
            attachments: req.attachments,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: MessagePayload,
    pub recipient_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkReadOutcome {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    /// False when an earlier call (or a concurrent one) already marked it.
    pub newly_marked: bool,
}

pub struct ConversationService {
    store: Arc<dyn ChatStore>,
    cipher: MessageCipher,
    access: AccessController,
    collaborators: Collaborators,
    settings: ServiceSettings,
    // participant id -> (filled at, summaries)
    list_cache: DashMap<Uuid, (Instant, Vec<ConversationSummary>)>,
}

impl ConversationService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        cipher: MessageCipher,
        access: AccessController,
        collaborators: Collaborators,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            cipher,
            access,
            collaborators,
            settings,
            list_cache: DashMap::new(),
        }
    }

    pub fn access(&self) -> &AccessController {
        &self.access
    }

    pub fn cipher(&self) -> &MessageCipher {
        &self.cipher
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Idempotent first contact. Concurrent creators converge on one row.
    pub async fn create_conversation(
        &self,
        actor: &Actor,
        counterpart_id: Uuid,
        lead_id: Option<Uuid>,
    ) -> AppResult<Conversation> {
        let own_id = self.access.resolver().resolve_identity(actor).await?;
        let (couple_id, vendor_id) = match actor.role {
            ParticipantRole::Couple => (own_id, counterpart_id),
            ParticipantRole::Vendor => (counterpart_id, own_id),
        };
        if couple_id == vendor_id {
            return Err(AppError::Validation(
                "a conversation needs two distinct participants".into(),
            ));
        }

        if let Some(existing) = bounded(
            self.settings.timeout,
            self.store.find_active_conversation(couple_id, vendor_id),
        )
        .await?
        {
            return Ok(existing);
        }

        let conversation = Conversation::new(couple_id, vendor_id, lead_id);
        match with_timeout(
            self.settings.timeout,
            self.store.insert_conversation(&conversation),
        )
        .await?
        {
            Ok(()) => {
                info!(
                    conversation_id = %conversation.id,
                    couple_id = %couple_id,
                    vendor_id = %vendor_id,
                    "conversation created"
                );
                self.invalidate_lists(&conversation);
                Ok(conversation)
            }
            Err(StorageError::UniqueViolation(_)) => {
                debug!(couple_id = %couple_id, vendor_id = %vendor_id, "lost creation race, re-reading");
                bounded(
                    self.settings.timeout,
                    self.store.find_active_conversation(couple_id, vendor_id),
                )
                .await?
                .ok_or_else(|| AppError::Storage("conversation vanished after conflict".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_conversations(&self, actor: &Actor) -> AppResult<Vec<ConversationSummary>> {
        let participant_id = self.access.resolver().resolve_identity(actor).await?;
        if let Some(entry) = self.list_cache.get(&participant_id) {
            if entry.0.elapsed() < LIST_CACHE_TTL {
                return Ok(entry.1.clone());
            }
        }

        let conversations = bounded(
            self.settings.timeout,
            self.store.list_conversations_for(participant_id),
        )
        .await?;
        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let unread_count = bounded(
                self.settings.timeout,
                self.store.count_unread(conversation.id, participant_id),
            )
            .await?;
            summaries.push(ConversationSummary {
                conversation,
                unread_count,
            });
        }
        self.list_cache
            .insert(participant_id, (Instant::now(), summaries.clone()));
        Ok(summaries)
    }

    pub async fn archive_conversation(&self, actor: &Actor, conversation_id: Uuid) -> AppResult<bool> {
        let granted = self
            .access
            .require(actor, AccessTarget::Conversation(conversation_id))
            .await?;
        let archived = bounded(
            self.settings.timeout,
            self.store.archive_conversation(conversation_id),
        )
        .await?;
        self.invalidate_lists(&granted.conversation);
        info!(conversation_id = %conversation_id, actor_id = %actor.user_id, "conversation archived");
        Ok(archived)
    }

    pub async fn send_message(&self, actor: &Actor, request: SendMessage) -> AppResult<SentMessage> {
        if request.message_type == MessageType::System {
            return Err(AppError::Validation(
                "system messages cannot be sent by participants".into(),
            ));
        }
        let content = validate_content(
            &request.content,
            self.settings.message_max_length,
            !request.attachments.is_empty(),
        )?;

        let granted = self
            .access
            .require(actor, AccessTarget::Conversation(request.conversation_id))
            .await?;
        let conversation = granted.conversation;
        let sender_id = granted.participant_id;

        let envelope = self.cipher.encrypt(&content, &conversation.id.to_string())?;
        let stored = StoredMessage::new(
            conversation.id,
            sender_id,
            actor.role,
            envelope,
            request.message_type,
        );
        bounded(self.settings.timeout, self.store.insert_message(&stored)).await?;

        let mut attachments = Vec::new();
        let mut failed_attachments = Vec::new();
        for upload in &request.attachments {
            match self.store_attachment(stored.id, upload).await {
                Ok(attachment) => attachments.push(attachment),
                Err(e) => {
                    warn!(
                        message_id = %stored.id,
                        file_name = %upload.file_name,
                        error = %e,
                        "attachment upload failed"
                    );
                    failed_attachments.push(upload.file_name.clone());
                }
            }
        }

        if let Err(e) = bounded(
            self.settings.timeout,
            self.store.touch_conversation(conversation.id, stored.created_at),
        )
        .await
        {
            warn!(conversation_id = %conversation.id, error = %e, "failed to bump conversation activity");
        }
        self.invalidate_lists(&conversation);

        let mut message = self.open(stored);
        message.attachments = attachments;
        message.failed_attachments = failed_attachments;

        let recipient_id = conversation.counterpart_of(sender_id);
        if let Some(recipient_id) = recipient_id {
            self.spawn_side_effects(&message, recipient_id);
        }

        info!(
            message_id = %message.id,
            conversation_id = %conversation.id,
            sender_role = %actor.role,
            "message sent"
        );
        Ok(SentMessage {
            message,
            recipient_id,
        })
    }

    /// Chronological page. One bad envelope degrades only its own row.
    pub async fn list_messages(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<MessagePage> {
        self.access
            .require(actor, AccessTarget::Conversation(conversation_id))
            .await?;

        let limit = limit.clamp(1, self.settings.page_max);
        let offset = offset.max(0);
        let (rows, total) = bounded(
            self.settings.timeout,
            self.store.list_messages(conversation_id, limit, offset),
        )
        .await?;
        let messages = self.open_with_attachments(rows).await?;

        Ok(MessagePage {
            messages,
            total,
            limit,
            offset,
            has_more: offset.saturating_add(limit) < total,
        })
    }

    /// Messages created after `since`, oldest first. Used for reconnect
    /// catch-up.
    pub async fn sync_since(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<MessagePayload>> {
        self.access
            .require(actor, AccessTarget::Conversation(conversation_id))
            .await?;
        let rows = bounded(
            self.settings.timeout,
            self.store.list_messages_since(conversation_id, since),
        )
        .await?;
        self.open_with_attachments(rows).await
    }

    pub async fn mark_message_read(&self, actor: &Actor, message_id: Uuid) -> AppResult<MarkReadOutcome> {
        let granted = self
            .access
            .require(actor, AccessTarget::Message(message_id))
            .await?;
        let message = live_message(granted.message)?;
        let reader_id = granted.participant_id;
        if message.sender_id == reader_id {
            return Err(AppError::Validation("cannot mark own message as read".into()));
        }

        let outcome = MarkReadOutcome {
            message_id,
            conversation_id: message.conversation_id,
            newly_marked: false,
        };
        if bounded(
            self.settings.timeout,
            self.store.has_read_receipt(message_id, reader_id),
        )
        .await?
        {
            return Ok(outcome);
        }

        let newly_marked = self.record_read(&message, reader_id).await?;
        self.invalidate_participant(reader_id);
        Ok(MarkReadOutcome {
            newly_marked,
            ..outcome
        })
    }

    /// Bulk read for every unread message the caller did not author.
    /// Returns the ids this call marked.
    pub async fn mark_conversation_read(&self, actor: &Actor, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let granted = self
            .access
            .require(actor, AccessTarget::Conversation(conversation_id))
            .await?;
        let reader_id = granted.participant_id;
        let unread = bounded(
            self.settings.timeout,
            self.store.unread_messages_for(conversation_id, reader_id),
        )
        .await?;

        let mut marked = Vec::new();
        for message in unread {
            if self.record_read(&message, reader_id).await? {
                marked.push(message.id);
            }
        }
        if !marked.is_empty() {
            self.invalidate_participant(reader_id);
            info!(conversation_id = %conversation_id, count = marked.len(), "conversation marked read");
        }
        Ok(marked)
    }

    /// Advance sent -> delivered for the recipient. Returns the conversation
    /// id when the status actually changed.
    pub async fn mark_delivered(&self, actor: &Actor, message_id: Uuid) -> AppResult<Option<Uuid>> {
        let granted = self
            .access
            .require(actor, AccessTarget::Message(message_id))
            .await?;
        let message = live_message(granted.message)?;
        if message.sender_id == granted.participant_id {
            return Ok(None);
        }
        let advanced = bounded(
            self.settings.timeout,
            self.store.advance_status(message_id, MessageStatus::Delivered),
        )
        .await?;
        Ok(advanced.then_some(message.conversation_id))
    }

    /// Soft delete by the original sender. Returns false if already deleted.
    pub async fn delete_message(&self, actor: &Actor, message_id: Uuid) -> AppResult<bool> {
        let granted = self
            .access
            .require(actor, AccessTarget::Message(message_id))
            .await?;
        let message = granted
            .message
            .ok_or_else(|| AppError::AccessDenied(REASON_MESSAGE_NOT_FOUND.into()))?;
        if message.sender_id != granted.participant_id || message.sender_role != actor.role {
            return Err(AppError::AccessDenied(REASON_NOT_SENDER.into()));
        }
        if message.is_deleted {
            return Ok(false);
        }

        let deleted = bounded(
            self.settings.timeout,
            self.store.soft_delete_message(message_id, Utc::now()),
        )
        .await?;
        if deleted {
            self.collaborators.reminders.cancel(message_id).await;
            self.invalidate_lists(&granted.conversation);
            info!(message_id = %message_id, "message deleted");
        }
        Ok(deleted)
    }

    /// Case-insensitive plaintext search, newest first. Undecryptable rows
    /// are skipped.
    pub async fn search_messages(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        query: &str,
        limit: usize,
    ) -> AppResult<Vec<MessagePayload>> {
        let needle = normalize_query(query)?;
        self.access
            .require(actor, AccessTarget::Conversation(conversation_id))
            .await?;
        let limit = limit.clamp(1, self.settings.page_max as usize);

        let (rows, _) = bounded(
            self.settings.timeout,
            self.store.list_messages(conversation_id, i64::MAX, 0),
        )
        .await?;
        let scope = conversation_id.to_string();

        let mut hits = Vec::new();
        for row in rows.into_iter().rev() {
            let Ok(content) = self.cipher.decrypt(&row.envelope, &scope) else {
                debug!(message_id = %row.id, "skipping undecryptable message in search");
                continue;
            };
            if content.to_lowercase().contains(&needle) {
                hits.push(row.into_payload(content, false));
                if hits.len() >= limit {
                    break;
                }
            }
        }
        Ok(hits)
    }

    /// Forward-only: envelopes written before the rotation no longer decrypt
    /// and read back as the placeholder.
    pub fn rotate_conversation_key(&self, conversation_id: Uuid) -> u32 {
        let key = self.cipher.keys().rotate_key(&conversation_id.to_string());
        warn!(
            conversation_id = %conversation_id,
            version = key.version(),
            "conversation key rotated; earlier messages become unreadable"
        );
        key.version()
    }

    fn open(&self, message: StoredMessage) -> MessagePayload {
        match self
            .cipher
            .decrypt(&message.envelope, &message.conversation_id.to_string())
        {
            Ok(content) => message.into_payload(content, false),
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    conversation_id = %message.conversation_id,
                    error = %e,
                    "message decryption failed"
                );
                message.into_payload(DECRYPTION_PLACEHOLDER.to_string(), true)
            }
        }
    }

    async fn open_with_attachments(&self, rows: Vec<StoredMessage>) -> AppResult<Vec<MessagePayload>> {
        let ids: Vec<Uuid> = rows.iter().map(|m| m.id).collect();
        let mut attachments =
            bounded(self.settings.timeout, self.store.list_attachments(&ids)).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut payload = self.open(row);
                payload.attachments = attachments.remove(&payload.id).unwrap_or_default();
                payload
            })
            .collect())
    }

    async fn store_attachment(
        &self,
        message_id: Uuid,
        upload: &AttachmentUpload,
    ) -> AppResult<event_schema::AttachmentRef> {
        let attachment = resilience::with_timeout_into(self.settings.timeout, async {
            self.collaborators
                .files
                .store(message_id, upload)
                .await
                .map_err(AppError::from)
        })
        .await?;
        bounded(
            self.settings.timeout,
            self.store.insert_attachment(message_id, &attachment),
        )
        .await?;
        Ok(attachment)
    }

    /// Receipt, status flip and side-effect cleanup for one message. A
    /// duplicate receipt means someone else won; that is not an error.
    async fn record_read(&self, message: &StoredMessage, reader_id: Uuid) -> AppResult<bool> {
        match with_timeout(
            self.settings.timeout,
            self.store.insert_read_receipt(message.id, reader_id, Utc::now()),
        )
        .await?
        {
            Ok(()) => {}
            Err(StorageError::UniqueViolation(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        bounded(
            self.settings.timeout,
            self.store.advance_status(message.id, MessageStatus::Read),
        )
        .await?;

        self.collaborators.reminders.cancel(message.id).await;
        if let Err(e) = with_timeout(
            self.settings.timeout,
            self.collaborators
                .notifications
                .clear_for_message(reader_id, message.id),
        )
        .await
        .map_err(|e| CollaboratorError::Unavailable(e.to_string()))
        .and_then(|r| r)
        {
            warn!(message_id = %message.id, error = %e, "failed to clear notification");
        }
        Ok(true)
    }

    fn spawn_side_effects(&self, message: &MessagePayload, recipient_id: Uuid) {
        let reminders = self.collaborators.reminders.clone();
        let notifications = self.collaborators.notifications.clone();
        let reminder = UnreadReminder {
            message_id: message.id,
            conversation_id: message.conversation_id,
            recipient_id,
            delay: self.settings.reminder_delay,
        };
        let sender_role = message.sender_role;
        let timeout = self.settings.timeout;

        tokio::spawn(async move {
            if let Err(e) = reminders.schedule(reminder.clone()).await {
                warn!(message_id = %reminder.message_id, error = %e, "failed to schedule reminder");
            }

            let retry = collaborator_config().retry.unwrap_or_default();
            let notified = with_retry(retry, || {
                let notifications = notifications.clone();
                let reminder = reminder.clone();
                async move {
                    with_timeout(
                        timeout,
                        notifications.notify_new_message(
                            reminder.recipient_id,
                            reminder.conversation_id,
                            reminder.message_id,
                            sender_role,
                        ),
                    )
                    .await
                    .map_err(|e| CollaboratorError::Unavailable(e.to_string()))
                    .and_then(|r| r)
                }
            })
            .await;
            if let Err(e) = notified {
                warn!(message_id = %reminder.message_id, error = %e, "notification failed");
            }
        });
    }

    fn invalidate_lists(&self, conversation: &Conversation) {
        self.list_cache.remove(&conversation.couple_id);
        self.list_cache.remove(&conversation.vendor_id);
    }

    fn invalidate_participant(&self, participant_id: Uuid) {
        self.list_cache.remove(&participant_id);
    }
}

fn live_message(message: Option<StoredMessage>) -> AppResult<StoredMessage> {
    match message {
        Some(m) if !m.is_deleted => Ok(m),
        _ => Err(AppError::AccessDenied(REASON_MESSAGE_NOT_FOUND.into())),
    }
}
