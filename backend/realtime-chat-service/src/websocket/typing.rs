use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use uuid::Uuid;

struct TypingTimer {
    generation: u64,
    handle: AbortHandle,
}

/// Typing indicators that expire on their own.
///
/// Each start re-arms the timer for (conversation, actor). If no further
/// start or stop arrives before `timeout`, the expiry callback runs.
pub struct TypingTracker {
    timeout: Duration,
    timers: Arc<DashMap<(Uuid, Uuid), TypingTimer>>,
    generation: AtomicU64,
}

impl TypingTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            timers: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns true if the actor was not already typing in the conversation.
    pub fn start<F, Fut>(&self, conversation_id: Uuid, actor_id: Uuid, on_expire: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = (conversation_id, actor_id);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let timers = self.timers.clone();
        let timeout = self.timeout;

        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // a newer start owns the slot
            let expired = timers
                .remove_if(&key, |_, timer| timer.generation == generation)
                .is_some();
            if expired {
                on_expire().await;
            }
        });

        let previous = self.timers.insert(
            key,
            TypingTimer {
                generation,
                handle: task.abort_handle(),
            },
        );
        match previous {
            Some(timer) => {
                timer.handle.abort();
                false
            }
            None => true,
        }
    }

    /// Returns true if a running indicator was stopped.
    pub fn stop(&self, conversation_id: Uuid, actor_id: Uuid) -> bool {
        match self.timers.remove(&(conversation_id, actor_id)) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every timer owned by `actor_id`. Returns the conversations that
    /// had a live indicator.
    pub fn clear_actor(&self, actor_id: Uuid) -> Vec<Uuid> {
        let keys: Vec<(Uuid, Uuid)> = self
            .timers
            .iter()
            .filter(|entry| entry.key().1 == actor_id)
            .map(|entry| *entry.key())
            .collect();
        keys.into_iter()
            .filter(|(conversation_id, _)| self.stop(*conversation_id, actor_id))
            .map(|(conversation_id, _)| conversation_id)
            .collect()
    }

    pub fn is_typing(&self, conversation_id: Uuid, actor_id: Uuid) -> bool {
        self.timers.contains_key(&(conversation_id, actor_id))
    }
}
