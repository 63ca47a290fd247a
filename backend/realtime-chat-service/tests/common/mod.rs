#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crypto_core::MasterSecret;
use event_schema::{AttachmentRef, MessageStatus, ParticipantRole, ServerEvent};
use realtime_chat_service::{
    collaborators::{
        Collaborators, InMemoryFileStorage, InMemoryNotificationSink, StaticProfileDirectory,
        TokioReminderScheduler,
    },
    config::Config,
    models::{AccessAuditEntry, Actor, Conversation, StoredMessage},
    state::AppState,
    storage::{
        AuditStore, ChatStore, ConversationStore, MemoryStore, MessageStore, StorageResult,
    },
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub profiles: Arc<StaticProfileDirectory>,
    pub notifications: Arc<InMemoryNotificationSink>,
    pub files: Arc<InMemoryFileStorage>,
    pub reminders: Arc<TokioReminderScheduler>,
    pub couple: Actor,
    pub vendor: Actor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn ChatStore> = store.clone();
        Self::assemble(config, store, shared)
    }

    /// Services over `shared`, which must be backed by `store`.
    pub fn over(shared: Arc<dyn ChatStore>, store: Arc<MemoryStore>) -> Self {
        Self::assemble(test_config(), store, shared)
    }

    fn assemble(config: Config, store: Arc<MemoryStore>, shared: Arc<dyn ChatStore>) -> Self {
        let profiles = Arc::new(StaticProfileDirectory::new());
        let notifications = Arc::new(InMemoryNotificationSink::new());
        let files = Arc::new(InMemoryFileStorage::new());
        let reminders = Arc::new(TokioReminderScheduler::new(
            shared.clone(),
            notifications.clone(),
        ));
        let collaborators = Collaborators {
            profiles: profiles.clone(),
            files: files.clone(),
            notifications: notifications.clone(),
            reminders: reminders.clone(),
        };
        let state = AppState::new(
            Arc::new(config),
            shared,
            collaborators,
            MasterSecret::from_bytes([7u8; 32]),
        );

        Self {
            state,
            store,
            profiles,
            notifications,
            files,
            reminders,
            couple: Actor::new(Uuid::new_v4(), ParticipantRole::Couple),
            vendor: Actor::new(Uuid::new_v4(), ParticipantRole::Vendor),
        }
    }

    pub async fn conversation(&self) -> Conversation {
        self.state
            .service
            .create_conversation(&self.couple, self.vendor.user_id, None)
            .await
            .expect("create conversation")
    }

    pub fn token_for(&self, actor: Actor) -> String {
        self.state
            .jwt
            .issue(actor, chrono::Duration::minutes(10))
            .expect("issue token")
    }
}

/// Development config with cheap key stretching.
pub fn test_config() -> Config {
    let mut config = Config::development();
    config.key_derivation_iterations = 1_000;
    config.collaborator_timeout = Duration::from_secs(2);
    config
}

pub async fn next_event(rx: &mut UnboundedReceiver<String>) -> ServerEvent {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed");
    ServerEvent::from_json(&frame).expect("valid server event")
}

/// Skip frames until one matches `pred`.
pub async fn expect_event<F>(rx: &mut UnboundedReceiver<String>, mut pred: F) -> ServerEvent
where
    F: FnMut(&ServerEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

pub fn assert_quiet(rx: &mut UnboundedReceiver<String>) {
    if let Ok(frame) = rx.try_recv() {
        panic!("unexpected frame: {frame}");
    }
}

/// Holds racing existence checks at a barrier so every racer reads the
/// same snapshot before any of them writes. Only the lookup the store was
/// built to race is held, and only for the first `racers` calls.
pub struct RacingStore {
    inner: Arc<MemoryStore>,
    barrier: Barrier,
    conversation_gate: AtomicUsize,
    unread_gate: AtomicUsize,
}

impl RacingStore {
    /// Race `find_active_conversation`.
    pub fn creation(inner: Arc<MemoryStore>, racers: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(racers),
            conversation_gate: AtomicUsize::new(racers),
            unread_gate: AtomicUsize::new(0),
        }
    }

    /// Race `unread_messages_for`.
    pub fn reads(inner: Arc<MemoryStore>, racers: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(racers),
            conversation_gate: AtomicUsize::new(0),
            unread_gate: AtomicUsize::new(racers),
        }
    }

    async fn hold(&self, gate: &AtomicUsize) {
        let admitted = gate
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if admitted {
            self.barrier.wait().await;
        }
    }
}

#[async_trait]
impl ConversationStore for RacingStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> StorageResult<()> {
        self.inner.insert_conversation(conversation).await
    }

    async fn find_conversation(&self, id: Uuid) -> StorageResult<Option<Conversation>> {
        self.inner.find_conversation(id).await
    }

    async fn find_active_conversation(
        &self,
        couple_id: Uuid,
        vendor_id: Uuid,
    ) -> StorageResult<Option<Conversation>> {
        let snapshot = self.inner.find_active_conversation(couple_id, vendor_id).await;
        self.hold(&self.conversation_gate).await;
        snapshot
    }

    async fn list_conversations_for(
        &self,
        participant_id: Uuid,
    ) -> StorageResult<Vec<Conversation>> {
        self.inner.list_conversations_for(participant_id).await
    }

    async fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<()> {
        self.inner.touch_conversation(id, at).await
    }

    async fn archive_conversation(&self, id: Uuid) -> StorageResult<bool> {
        self.inner.archive_conversation(id).await
    }
}

#[async_trait]
impl MessageStore for RacingStore {
    async fn insert_message(&self, message: &StoredMessage) -> StorageResult<()> {
        self.inner.insert_message(message).await
    }

    async fn find_message(&self, id: Uuid) -> StorageResult<Option<StoredMessage>> {
        self.inner.find_message(id).await
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StorageResult<(Vec<StoredMessage>, i64)> {
        self.inner.list_messages(conversation_id, limit, offset).await
    }

    async fn list_messages_since(
        &self,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredMessage>> {
        self.inner.list_messages_since(conversation_id, since).await
    }

    async fn advance_status(&self, id: Uuid, status: MessageStatus) -> StorageResult<bool> {
        self.inner.advance_status(id, status).await
    }

    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<bool> {
        self.inner.soft_delete_message(id, at).await
    }

    async fn insert_read_receipt(
        &self,
        message_id: Uuid,
        reader_id: Uuid,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.inner.insert_read_receipt(message_id, reader_id, at).await
    }

    async fn has_read_receipt(&self, message_id: Uuid, reader_id: Uuid) -> StorageResult<bool> {
        self.inner.has_read_receipt(message_id, reader_id).await
    }

    async fn unread_messages_for(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> StorageResult<Vec<StoredMessage>> {
        let snapshot = self.inner.unread_messages_for(conversation_id, reader_id).await;
        self.hold(&self.unread_gate).await;
        snapshot
    }

    async fn count_unread(&self, conversation_id: Uuid, reader_id: Uuid) -> StorageResult<i64> {
        self.inner.count_unread(conversation_id, reader_id).await
    }

    async fn insert_attachment(
        &self,
        message_id: Uuid,
        attachment: &AttachmentRef,
    ) -> StorageResult<()> {
        self.inner.insert_attachment(message_id, attachment).await
    }

    async fn list_attachments(
        &self,
        message_ids: &[Uuid],
    ) -> StorageResult<HashMap<Uuid, Vec<AttachmentRef>>> {
        self.inner.list_attachments(message_ids).await
    }
}

#[async_trait]
impl AuditStore for RacingStore {
    async fn append_audit(
        &self,
        entry: &AccessAuditEntry,
        max_per_actor: usize,
    ) -> StorageResult<()> {
        self.inner.append_audit(entry, max_per_actor).await
    }

    async fn prune_audit(&self, max_per_actor: usize) -> StorageResult<u64> {
        self.inner.prune_audit(max_per_actor).await
    }

    async fn count_denials_since(
        &self,
        actor_id: Uuid,
        since: DateTime<Utc>,
    ) -> StorageResult<i64> {
        self.inner.count_denials_since(actor_id, since).await
    }

    async fn audit_entries_for(&self, actor_id: Uuid) -> StorageResult<Vec<AccessAuditEntry>> {
        self.inner.audit_entries_for(actor_id).await
    }
}
