use super::{AuditStore, ConversationStore, MessageStore, StorageError, StorageResult};
use crate::models::{AccessAuditEntry, AccessDecision, Conversation, StoredMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_schema::{AttachmentRef, MessageStatus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, StoredMessage>,
    // conversation -> message ids in insert order
    timeline: HashMap<Uuid, Vec<Uuid>>,
    receipts: HashSet<(Uuid, Uuid)>,
    attachments: HashMap<Uuid, Vec<AttachmentRef>>,
    // actor -> entries, oldest first
    audit: HashMap<Uuid, VecDeque<AccessAuditEntry>>,
}

impl MemoryState {
    fn live_messages(&self, conversation_id: Uuid) -> impl Iterator<Item = &StoredMessage> {
        self.timeline
            .get(&conversation_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.messages.get(id))
            .filter(|m| !m.is_deleted)
    }
}

/// Process-local store. Same uniqueness rules as the Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> StorageResult<()> {
        let mut state = self.state.lock();
        let duplicate = conversation.is_active
            && state.conversations.values().any(|c| {
                c.is_active
                    && c.couple_id == conversation.couple_id
                    && c.vendor_id == conversation.vendor_id
            });
        if duplicate || state.conversations.contains_key(&conversation.id) {
            return Err(StorageError::UniqueViolation(
                "conversations_active_pair".to_string(),
            ));
        }
        state
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn find_conversation(&self, id: Uuid) -> StorageResult<Option<Conversation>> {
        Ok(self.state.lock().conversations.get(&id).cloned())
    }

    async fn find_active_conversation(
        &self,
        couple_id: Uuid,
        vendor_id: Uuid,
    ) -> StorageResult<Option<Conversation>> {
        Ok(self
            .state
            .lock()
            .conversations
            .values()
            .find(|c| c.is_active && c.couple_id == couple_id && c.vendor_id == vendor_id)
            .cloned())
    }

    async fn list_conversations_for(
        &self,
        participant_id: Uuid,
    ) -> StorageResult<Vec<Conversation>> {
        let state = self.state.lock();
        let mut list: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.has_participant(participant_id))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(list)
    }

    async fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<()> {
        let mut state = self.state.lock();
        let conversation = state
            .conversations
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound("conversation".into()))?;
        if at > conversation.last_activity_at {
            conversation.last_activity_at = at;
        }
        Ok(())
    }

    async fn archive_conversation(&self, id: Uuid) -> StorageResult<bool> {
        let mut state = self.state.lock();
        let conversation = state
            .conversations
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound("conversation".into()))?;
        let was_active = conversation.is_active;
        conversation.is_active = false;
        Ok(was_active)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, message: &StoredMessage) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.messages.contains_key(&message.id) {
            return Err(StorageError::UniqueViolation("messages_pkey".into()));
        }
        if !state.conversations.contains_key(&message.conversation_id) {
            return Err(StorageError::NotFound("conversation".into()));
        }
        state
            .timeline
            .entry(message.conversation_id)
            .or_default()
            .push(message.id);
        state.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn find_message(&self, id: Uuid) -> StorageResult<Option<StoredMessage>> {
        Ok(self.state.lock().messages.get(&id).cloned())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StorageResult<(Vec<StoredMessage>, i64)> {
        let state = self.state.lock();
        let live: Vec<&StoredMessage> = state.live_messages(conversation_id).collect();
        let total = live.len() as i64;
        let page = live
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn list_messages_since(
        &self,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredMessage>> {
        let state = self.state.lock();
        Ok(state
            .live_messages(conversation_id)
            .filter(|m| m.created_at > since)
            .cloned()
            .collect())
    }

    async fn advance_status(&self, id: Uuid, status: MessageStatus) -> StorageResult<bool> {
        let mut state = self.state.lock();
        let message = state
            .messages
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound("message".into()))?;
        if message.status.can_advance_to(status) {
            message.status = status;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<bool> {
        let mut state = self.state.lock();
        let message = state
            .messages
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound("message".into()))?;
        if message.is_deleted {
            return Ok(false);
        }
        message.is_deleted = true;
        message.deleted_at = Some(at);
        Ok(true)
    }

    async fn insert_read_receipt(
        &self,
        message_id: Uuid,
        reader_id: Uuid,
        _at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        if !state.receipts.insert((message_id, reader_id)) {
            return Err(StorageError::UniqueViolation(
                "message_read_receipts_pkey".into(),
            ));
        }
        Ok(())
    }

    async fn has_read_receipt(&self, message_id: Uuid, reader_id: Uuid) -> StorageResult<bool> {
        Ok(self.state.lock().receipts.contains(&(message_id, reader_id)))
    }

    async fn unread_messages_for(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> StorageResult<Vec<StoredMessage>> {
        let state = self.state.lock();
        Ok(state
            .live_messages(conversation_id)
            .filter(|m| m.sender_id != reader_id && m.status != MessageStatus::Read)
            .cloned()
            .collect())
    }

    async fn count_unread(&self, conversation_id: Uuid, reader_id: Uuid) -> StorageResult<i64> {
        let state = self.state.lock();
        Ok(state
            .live_messages(conversation_id)
            .filter(|m| m.sender_id != reader_id && m.status != MessageStatus::Read)
            .count() as i64)
    }

    async fn insert_attachment(
        &self,
        message_id: Uuid,
        attachment: &AttachmentRef,
    ) -> StorageResult<()> {
        self.state
            .lock()
            .attachments
            .entry(message_id)
            .or_default()
            .push(attachment.clone());
        Ok(())
    }

    async fn list_attachments(
        &self,
        message_ids: &[Uuid],
    ) -> StorageResult<HashMap<Uuid, Vec<AttachmentRef>>> {
        let state = self.state.lock();
        Ok(message_ids
            .iter()
            .filter_map(|id| state.attachments.get(id).map(|a| (*id, a.clone())))
            .collect())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(
        &self,
        entry: &AccessAuditEntry,
        max_per_actor: usize,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let entries = state.audit.entry(entry.actor_id).or_default();
        entries.push_back(entry.clone());
        while entries.len() > max_per_actor {
            entries.pop_front();
        }
        Ok(())
    }

    async fn prune_audit(&self, max_per_actor: usize) -> StorageResult<u64> {
        let mut state = self.state.lock();
        let mut removed = 0u64;
        for entries in state.audit.values_mut() {
            while entries.len() > max_per_actor {
                entries.pop_front();
                removed += 1;
            }
        }
        state.audit.retain(|_, entries| !entries.is_empty());
        Ok(removed)
    }

    async fn count_denials_since(
        &self,
        actor_id: Uuid,
        since: DateTime<Utc>,
    ) -> StorageResult<i64> {
        let state = self.state.lock();
        Ok(state
            .audit
            .get(&actor_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.decision == AccessDecision::Denied && e.created_at >= since)
                    .count() as i64
            })
            .unwrap_or(0))
    }

    async fn audit_entries_for(&self, actor_id: Uuid) -> StorageResult<Vec<AccessAuditEntry>> {
        let state = self.state.lock();
        Ok(state
            .audit
            .get(&actor_id)
            .map(|entries| entries.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}
