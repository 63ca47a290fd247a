//! Persistence collaborators.
//!
//! The service only talks to these traits. Two implementations ship:
//! [`MemoryStore`] for development and tests and [`PgStore`] on top of
//! deadpool-postgres. Both report duplicate inserts as
//! [`StorageError::UniqueViolation`] so callers can re-read instead of failing.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{AccessAuditEntry, Conversation, StoredMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_schema::{AttachmentRef, MessageStatus};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Another writer inserted the same key first.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fails with `UniqueViolation` if the pair already has an active thread.
    async fn insert_conversation(&self, conversation: &Conversation) -> StorageResult<()>;

    async fn find_conversation(&self, id: Uuid) -> StorageResult<Option<Conversation>>;

    async fn find_active_conversation(
        &self,
        couple_id: Uuid,
        vendor_id: Uuid,
    ) -> StorageResult<Option<Conversation>>;

    /// Every conversation (active or archived) where `participant_id` is a
    /// side, most recent activity first.
    async fn list_conversations_for(&self, participant_id: Uuid)
        -> StorageResult<Vec<Conversation>>;

    async fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<()>;

    /// Returns false if the conversation was already archived.
    async fn archive_conversation(&self, id: Uuid) -> StorageResult<bool>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: &StoredMessage) -> StorageResult<()>;

    /// Includes soft-deleted rows.
    async fn find_message(&self, id: Uuid) -> StorageResult<Option<StoredMessage>>;

    /// Non-deleted messages in creation order, plus the total non-deleted count.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StorageResult<(Vec<StoredMessage>, i64)>;

    /// Non-deleted messages created strictly after `since`, oldest first.
    async fn list_messages_since(
        &self,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredMessage>>;

    /// Move `status` forward. Returns false when the stored status is already
    /// at or past `status`.
    async fn advance_status(&self, id: Uuid, status: MessageStatus) -> StorageResult<bool>;

    /// Returns false if the message was already deleted.
    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<bool>;

    /// Fails with `UniqueViolation` when the reader already has a receipt.
    async fn insert_read_receipt(
        &self,
        message_id: Uuid,
        reader_id: Uuid,
        at: DateTime<Utc>,
    ) -> StorageResult<()>;

    async fn has_read_receipt(&self, message_id: Uuid, reader_id: Uuid) -> StorageResult<bool>;

    /// Non-deleted messages not sent by `reader_id` that are not yet read.
    async fn unread_messages_for(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> StorageResult<Vec<StoredMessage>>;

    async fn count_unread(&self, conversation_id: Uuid, reader_id: Uuid) -> StorageResult<i64>;

    async fn insert_attachment(
        &self,
        message_id: Uuid,
        attachment: &AttachmentRef,
    ) -> StorageResult<()>;

    async fn list_attachments(
        &self,
        message_ids: &[Uuid],
    ) -> StorageResult<HashMap<Uuid, Vec<AttachmentRef>>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append and drop the actor's oldest entries beyond `max_per_actor`.
    async fn append_audit(
        &self,
        entry: &AccessAuditEntry,
        max_per_actor: usize,
    ) -> StorageResult<()>;

    /// Enforce the cap for every actor. Returns the number of rows removed.
    async fn prune_audit(&self, max_per_actor: usize) -> StorageResult<u64>;

    async fn count_denials_since(
        &self,
        actor_id: Uuid,
        since: DateTime<Utc>,
    ) -> StorageResult<i64>;

    /// Newest first.
    async fn audit_entries_for(&self, actor_id: Uuid) -> StorageResult<Vec<AccessAuditEntry>>;
}

/// Everything the chat service persists.
pub trait ChatStore: ConversationStore + MessageStore + AuditStore {}

impl<T> ChatStore for T where T: ConversationStore + MessageStore + AuditStore {}
