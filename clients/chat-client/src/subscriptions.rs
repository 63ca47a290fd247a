//! Typed callback registries.
//!
//! Each event kind gets its own [`Subscribers`] list. Registering returns a
//! [`Subscription`] that removes the callback again; dropping the handle
//! without calling [`Subscription::unsubscribe`] leaves it registered.

use crate::error::ClientError;
use chrono::{DateTime, Utc};
use event_schema::{MessagePayload, MessageStatus, PresenceStatus};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct Subscribers<T> {
    entries: Arc<Mutex<Vec<(u64, Callback<T>)>>>,
    next_id: AtomicU64,
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, Arc::new(callback)));

        let entries = Arc::downgrade(&self.entries);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(entries) = entries.upgrade() {
                    entries.lock().retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Call every subscriber. Callbacks run outside the lock so they may
    /// subscribe or unsubscribe.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in snapshot {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypingEvent {
    pub conversation_id: Uuid,
    pub actor_id: Uuid,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEvent {
    pub actor_id: Uuid,
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Delivery or read transition reported by the other side.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub status: MessageStatus,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting { attempt: u32 },
    Connected,
    /// Reconnect attempts exhausted or credentials refused.
    Failed,
}

/// Everything a UI can listen to on a session.
#[derive(Default)]
pub struct SessionEvents {
    pub message: Subscribers<MessagePayload>,
    pub typing: Subscribers<TypingEvent>,
    pub presence: Subscribers<PresenceEvent>,
    pub read_receipt: Subscribers<StatusEvent>,
    pub delivery_status: Subscribers<StatusEvent>,
    pub connection_state: Subscribers<ConnectionStatus>,
    pub error: Subscribers<ClientError>,
}
