use super::{Transport, TransportLink};
use crate::error::ClientError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::mpsc;

/// Server half of an in-process connection. Dropping `to_client` closes the
/// connection from the server side.
pub struct ServerLink {
    pub to_client: mpsc::UnboundedSender<String>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

/// Channel-backed transport. Every successful `connect` hands a fresh
/// [`ServerLink`] to whoever holds the accept receiver.
pub struct InMemoryTransport {
    accept: mpsc::UnboundedSender<ServerLink>,
    online: AtomicBool,
    attempts: AtomicU32,
}

impl InMemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerLink>) {
        let (accept, accepted) = mpsc::unbounded_channel();
        (
            Self {
                accept,
                online: AtomicBool::new(true),
                attempts: AtomicU32::new(0),
            },
            accepted,
        )
    }

    /// While offline every connect attempt fails.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> Result<TransportLink, ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("server unreachable".into()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.accept
            .send(ServerLink {
                to_client,
                from_client,
            })
            .map_err(|_| ClientError::Transport("listener closed".into()))?;

        Ok(TransportLink { outbound, inbound })
    }
}
