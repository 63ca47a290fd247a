//! Durable client state: per-conversation sync bookkeeping and the outbound
//! queue. Both live in JSON files named after the installation id and are
//! rewritten atomically (temp file, then rename) after every change.

use crate::error::{ClientError, Result};
use chrono::{DateTime, Utc};
use event_schema::MessageType;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationSyncState {
    pub conversation_id: Uuid,
    pub last_read_message_id: Option<Uuid>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
    /// Message the thread view was scrolled to.
    pub scroll_anchor: Option<Uuid>,
}

impl ConversationSyncState {
    fn new(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SyncBlob {
    installation_id: String,
    last_connected_at: Option<DateTime<Utc>>,
    conversations: BTreeMap<Uuid, ConversationSyncState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOutboundMessage {
    /// Doubles as the `request_id` of every flush attempt.
    pub local_id: Uuid,
    pub conversation_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

/// What happened to a queued message after a failed flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    Retry { retry_count: u32 },
    Dropped,
    Missing,
}

struct Paths {
    sync: PathBuf,
    queue: PathBuf,
}

struct Inner {
    sync: SyncBlob,
    queue: VecDeque<QueuedOutboundMessage>,
}

pub struct OfflineSyncStore {
    paths: Option<Paths>,
    inner: Mutex<Inner>,
}

impl OfflineSyncStore {
    /// Load (or start) the state for `installation_id` under `dir`.
    ///
    /// Unreadable files are logged and replaced with empty state rather than
    /// locking the client out.
    pub fn open(dir: impl AsRef<Path>, installation_id: &str) -> Result<Self> {
        validate_installation_id(installation_id)?;
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let paths = Paths {
            sync: dir.join(format!("{installation_id}.sync.json")),
            queue: dir.join(format!("{installation_id}.queue.json")),
        };

        let mut sync: SyncBlob = load_or_default(&paths.sync);
        sync.installation_id = installation_id.to_string();
        let queue: VecDeque<QueuedOutboundMessage> = load_or_default(&paths.queue);
        if !queue.is_empty() {
            info!(installation_id, queued = queue.len(), "restored outbound queue");
        }

        Ok(Self {
            paths: Some(paths),
            inner: Mutex::new(Inner { sync, queue }),
        })
    }

    /// Non-persistent store, for sessions without a state directory.
    pub fn in_memory(installation_id: &str) -> Self {
        Self {
            paths: None,
            inner: Mutex::new(Inner {
                sync: SyncBlob {
                    installation_id: installation_id.to_string(),
                    ..Default::default()
                },
                queue: VecDeque::new(),
            }),
        }
    }

    pub fn installation_id(&self) -> String {
        self.inner.lock().sync.installation_id.clone()
    }

    // ---- outbound queue ----

    pub fn enqueue(
        &self,
        conversation_id: Uuid,
        content: impl Into<String>,
        message_type: MessageType,
    ) -> Result<QueuedOutboundMessage> {
        let entry = QueuedOutboundMessage {
            local_id: Uuid::new_v4(),
            conversation_id,
            content: content.into(),
            message_type,
            retry_count: 0,
            created_at: Utc::now(),
        };
        let mut inner = self.inner.lock();
        inner.queue.push_back(entry.clone());
        self.persist_queue(&inner)?;
        Ok(entry)
    }

    /// Queued messages, oldest first.
    pub fn pending(&self) -> Vec<QueuedOutboundMessage> {
        self.inner.lock().queue.iter().cloned().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Drop a message the server confirmed.
    pub fn remove(&self, local_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock();
        let before = inner.queue.len();
        inner.queue.retain(|m| m.local_id != local_id);
        let removed = inner.queue.len() != before;
        if removed {
            self.persist_queue(&inner)?;
        }
        Ok(removed)
    }

    /// Count a failed flush. Past `max_retries` the message is discarded.
    pub fn record_failure(&self, local_id: Uuid, max_retries: u32) -> Result<RetryVerdict> {
        let mut inner = self.inner.lock();
        let Some(pos) = inner.queue.iter().position(|m| m.local_id == local_id) else {
            return Ok(RetryVerdict::Missing);
        };

        let verdict = {
            let entry = &mut inner.queue[pos];
            entry.retry_count += 1;
            if entry.retry_count >= max_retries {
                warn!(
                    local_id = %entry.local_id,
                    conversation_id = %entry.conversation_id,
                    retries = entry.retry_count,
                    "dropping queued message after max retries"
                );
                RetryVerdict::Dropped
            } else {
                RetryVerdict::Retry {
                    retry_count: entry.retry_count,
                }
            }
        };
        if verdict == RetryVerdict::Dropped {
            inner.queue.remove(pos);
        }
        self.persist_queue(&inner)?;
        Ok(verdict)
    }

    // ---- sync state ----

    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().sync.last_connected_at
    }

    pub fn set_last_connected_at(&self, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.sync.last_connected_at = Some(at);
        self.persist_sync(&inner)
    }

    pub fn conversation(&self, conversation_id: Uuid) -> Option<ConversationSyncState> {
        self.inner
            .lock()
            .sync
            .conversations
            .get(&conversation_id)
            .cloned()
    }

    /// Note a message received from the server.
    pub fn record_received(
        &self,
        conversation_id: Uuid,
        created_at: DateTime<Utc>,
        counts_as_unread: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = inner
            .sync
            .conversations
            .entry(conversation_id)
            .or_insert_with(|| ConversationSyncState::new(conversation_id));
        state.last_sync_at = later(state.last_sync_at, Some(created_at));
        if counts_as_unread {
            state.unread_count += 1;
        }
        self.persist_sync(&inner)
    }

    pub fn mark_read(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = inner
            .sync
            .conversations
            .entry(conversation_id)
            .or_insert_with(|| ConversationSyncState::new(conversation_id));
        if state.last_read_at.map_or(true, |prev| at >= prev) {
            state.last_read_message_id = Some(message_id);
            state.last_read_at = Some(at);
            state.unread_count = 0;
        }
        self.persist_sync(&inner)
    }

    pub fn set_scroll_anchor(&self, conversation_id: Uuid, anchor: Option<Uuid>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .sync
            .conversations
            .entry(conversation_id)
            .or_insert_with(|| ConversationSyncState::new(conversation_id))
            .scroll_anchor = anchor;
        self.persist_sync(&inner)
    }

    /// Reconcile with the server's view of a conversation: the later
    /// last-read marker wins (with its unread count), and the sync timestamp
    /// only moves forward.
    pub fn merge_server_state(&self, remote: ConversationSyncState) -> Result<ConversationSyncState> {
        let mut inner = self.inner.lock();
        let local = inner
            .sync
            .conversations
            .entry(remote.conversation_id)
            .or_insert_with(|| ConversationSyncState::new(remote.conversation_id));

        let remote_newer = match (remote.last_read_at, local.last_read_at) {
            (Some(r), Some(l)) => r > l,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if remote_newer {
            local.last_read_message_id = remote.last_read_message_id;
            local.last_read_at = remote.last_read_at;
            local.unread_count = remote.unread_count;
        }
        local.last_sync_at = later(local.last_sync_at, remote.last_sync_at);

        let merged = local.clone();
        self.persist_sync(&inner)?;
        Ok(merged)
    }

    fn persist_sync(&self, inner: &Inner) -> Result<()> {
        match &self.paths {
            Some(paths) => write_atomic(&paths.sync, &inner.sync),
            None => Ok(()),
        }
    }

    fn persist_queue(&self, inner: &Inner) -> Result<()> {
        match &self.paths {
            Some(paths) => write_atomic(&paths.queue, &inner.queue),
            None => Ok(()),
        }
    }
}

fn later(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn validate_installation_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ClientError::Storage(format!("invalid installation id: {id:?}")))
    }
}

fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "discarding unreadable client state");
            T::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read client state");
            T::default()
        }
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
