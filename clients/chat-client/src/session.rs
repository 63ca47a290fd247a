//! Client connection lifecycle.
//!
//! A [`ConnectionSession`] owns one supervisor task that connects,
//! authenticates, rejoins rooms, asks for catch-up and flushes the offline
//! queue, then reads frames until the link drops. Lost links are retried on
//! the configured backoff schedule until it runs out.

use crate::config::SessionConfig;
use crate::error::{ClientError, Result};
use crate::offline_store::{OfflineSyncStore, QueuedOutboundMessage, RetryVerdict};
use crate::subscriptions::{
    ConnectionStatus, PresenceEvent, SessionEvents, StatusEvent, TypingEvent,
};
use crate::transport::{Transport, TransportLink, WebSocketTransport};
use chrono::{DateTime, Utc};
use event_schema::{
    ClientEvent, MessageAck, MessagePayload, MessageStatus, MessageType, ParticipantRole,
    SendMessageRequest, ServerEvent,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SEEN_CAPACITY: usize = 2048;

/// Result of [`ConnectionSession::send_message`].
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Stored by the server and acknowledged.
    Delivered(MessagePayload),
    /// No live connection; parked in the durable queue.
    Queued(QueuedOutboundMessage),
}

/// Snapshot of the session for UIs and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub actor_id: Option<Uuid>,
    pub role: Option<ParticipantRole>,
    pub rooms: Vec<Uuid>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

#[derive(Default)]
struct LinkState {
    outbound: Option<mpsc::UnboundedSender<String>>,
    /// Rooms to be in whenever a link is up.
    rooms: BTreeSet<Uuid>,
    /// Joins requested while offline.
    pending_joins: BTreeSet<Uuid>,
    actor: Option<(Uuid, ParticipantRole)>,
    reconnect_attempts: u32,
    last_connected_at: Option<DateTime<Utc>>,
}

/// Ids already handed to the message callback. Bounded FIFO.
#[derive(Default)]
struct SeenMessages {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl SeenMessages {
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

struct Shared {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    store: Arc<OfflineSyncStore>,
    events: SessionEvents,
    link: Mutex<LinkState>,
    status: watch::Sender<ConnectionStatus>,
    pending_acks: Mutex<HashMap<String, oneshot::Sender<MessageAck>>>,
    seen: Mutex<SeenMessages>,
    shutdown: watch::Sender<bool>,
    flush_lock: tokio::sync::Mutex<()>,
}

pub struct ConnectionSession {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        store: Arc<OfflineSyncStore>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                store,
                events: SessionEvents::default(),
                link: Mutex::new(LinkState::default()),
                status,
                pending_acks: Mutex::new(HashMap::new()),
                seen: Mutex::new(SeenMessages::default()),
                shutdown,
                flush_lock: tokio::sync::Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    /// WebSocket session with state persisted under `config.state_dir` (or
    /// kept in memory when unset).
    pub fn open(config: SessionConfig) -> Result<Self> {
        let store = match &config.state_dir {
            Some(dir) => OfflineSyncStore::open(dir, &config.installation_id)?,
            None => OfflineSyncStore::in_memory(&config.installation_id),
        };
        let transport = Arc::new(WebSocketTransport::new(config.server_url.clone()));
        Ok(Self::new(config, transport, Arc::new(store)))
    }

    pub fn events(&self) -> &SessionEvents {
        &self.shared.events
    }

    pub fn store(&self) -> &Arc<OfflineSyncStore> {
        &self.shared.store
    }

    pub fn state(&self) -> ConnectionState {
        let link = self.shared.link.lock();
        ConnectionState {
            status: *self.shared.status.borrow(),
            reconnect_attempts: link.reconnect_attempts,
            last_connected_at: link.last_connected_at,
            actor_id: link.actor.map(|(id, _)| id),
            role: link.actor.map(|(_, role)| role),
            rooms: link.rooms.iter().copied().collect(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Start the supervisor. A no-op while one is already running.
    pub fn connect(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        self.shared.shutdown.send_replace(false);
        *task = Some(tokio::spawn(run(self.shared.clone())));
    }

    /// Close the link and cancel any pending reconnect.
    pub async fn disconnect(&self) {
        self.shared.shutdown.send_replace(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "session task ended abnormally");
            }
        }
        self.shared.drop_link();
        self.shared.set_status(ConnectionStatus::Disconnected);
    }

    /// Wait for the next time the session reports `Connected`.
    pub async fn wait_until_connected(&self, within: Duration) -> Result<()> {
        let mut rx = self.shared.status.subscribe();
        let outcome = match tokio::time::timeout(
            within,
            rx.wait_for(|s| *s == ConnectionStatus::Connected),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Transport("session dropped".into())),
            Err(_) => Err(ClientError::Timeout(within)),
        };
        outcome
    }

    /// Join a conversation room now, or on the next connect when offline.
    pub fn join_thread(&self, conversation_id: Uuid) -> Result<()> {
        let mut link = self.shared.link.lock();
        if link.outbound.is_some() {
            link.rooms.insert(conversation_id);
            drop(link);
            self.shared
                .send_event(&ClientEvent::JoinThread { conversation_id })
        } else {
            link.pending_joins.insert(conversation_id);
            Ok(())
        }
    }

    pub fn leave_thread(&self, conversation_id: Uuid) -> Result<()> {
        let online = {
            let mut link = self.shared.link.lock();
            link.pending_joins.remove(&conversation_id);
            link.rooms.remove(&conversation_id) && link.outbound.is_some()
        };
        if online {
            self.shared
                .send_event(&ClientEvent::LeaveThread { conversation_id })?;
        }
        Ok(())
    }

    /// Send with acknowledgement. Offline, or when the link drops before the
    /// ack arrives, the message goes to the durable queue instead. A
    /// timed-out send is reported and not queued, since the server may
    /// already have stored it.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        content: impl Into<String>,
        message_type: MessageType,
    ) -> Result<SendOutcome> {
        let content = content.into();
        let request_id = Uuid::new_v4().to_string();
        let request = SendMessageRequest {
            request_id: Some(request_id.clone()),
            conversation_id,
            content: content.clone(),
            message_type,
            attachments: Vec::new(),
        };

        let ack = match self.shared.dispatch_send(&request_id, request) {
            Ok(ack) => ack,
            Err(e) => {
                debug!(%conversation_id, reason = %e, "offline, queueing message");
                let queued = self
                    .shared
                    .store
                    .enqueue(conversation_id, content, message_type)?;
                return Ok(SendOutcome::Queued(queued));
            }
        };

        match self.shared.await_ack(&request_id, ack).await {
            Ok(message) => {
                self.shared.seen.lock().insert(message.id);
                Ok(SendOutcome::Delivered(message))
            }
            Err(ClientError::Transport(reason)) => {
                warn!(%conversation_id, %reason, "link lost mid-send, queueing message");
                let queued = self
                    .shared
                    .store
                    .enqueue(conversation_id, content, message_type)?;
                Ok(SendOutcome::Queued(queued))
            }
            Err(e) => Err(e),
        }
    }

    pub fn start_typing(&self, conversation_id: Uuid) -> Result<()> {
        self.shared
            .send_event(&ClientEvent::TypingStart { conversation_id })
    }

    pub fn stop_typing(&self, conversation_id: Uuid) -> Result<()> {
        self.shared
            .send_event(&ClientEvent::TypingStop { conversation_id })
    }

    /// Record the read marker locally and tell the server.
    pub fn mark_read(&self, conversation_id: Uuid, message_id: Uuid) -> Result<()> {
        self.shared
            .store
            .mark_read(conversation_id, message_id, Utc::now())?;
        self.shared
            .send_event(&ClientEvent::MessageRead { message_id })
    }

    pub fn mark_delivered(&self, message_id: Uuid) -> Result<()> {
        self.shared
            .send_event(&ClientEvent::MessageDelivered { message_id })
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

impl Shared {
    fn is_connected(&self) -> bool {
        *self.status.borrow() == ConnectionStatus::Connected
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            self.events.connection_state.emit(&status);
        }
    }

    fn actor_id(&self) -> Option<Uuid> {
        self.link.lock().actor.map(|(id, _)| id)
    }

    fn send_event(&self, event: &ClientEvent) -> Result<()> {
        let frame = event.to_json()?;
        let link = self.link.lock();
        let outbound = link
            .outbound
            .as_ref()
            .ok_or_else(|| ClientError::Transport("not connected".into()))?;
        outbound
            .send(frame)
            .map_err(|_| ClientError::Transport("connection closed".into()))
    }

    /// Register the ack slot and put the frame on the wire.
    fn dispatch_send(
        &self,
        request_id: &str,
        request: SendMessageRequest,
    ) -> Result<oneshot::Receiver<MessageAck>> {
        if !self.is_connected() {
            return Err(ClientError::Transport("not connected".into()));
        }
        let (tx, rx) = oneshot::channel();
        self.pending_acks.lock().insert(request_id.to_string(), tx);
        if let Err(e) = self.send_event(&ClientEvent::SendMessage(request)) {
            self.pending_acks.lock().remove(request_id);
            return Err(e);
        }
        Ok(rx)
    }

    async fn await_ack(
        &self,
        request_id: &str,
        ack: oneshot::Receiver<MessageAck>,
    ) -> Result<MessagePayload> {
        let limit = self.config.ack_timeout;
        match tokio::time::timeout(limit, ack).await {
            Ok(Ok(ack)) if ack.ok => ack
                .message
                .ok_or_else(|| ClientError::Transport("ack without message".into())),
            Ok(Ok(ack)) => Err(ClientError::Rejected(
                ack.error.unwrap_or_else(|| "rejected".into()),
            )),
            Ok(Err(_)) => Err(ClientError::Transport(
                "connection lost before acknowledgement".into(),
            )),
            Err(_) => {
                self.pending_acks.lock().remove(request_id);
                warn!(request_id, timeout_ms = limit.as_millis() as u64, "send not acknowledged");
                Err(ClientError::Timeout(limit))
            }
        }
    }

    /// Connect, authenticate and restore room membership.
    async fn establish(&self) -> Result<mpsc::UnboundedReceiver<String>> {
        let TransportLink {
            outbound,
            mut inbound,
        } = self.transport.connect().await?;

        let hello = ClientEvent::Authenticate {
            token: self.config.token.clone(),
        };
        outbound
            .send(hello.to_json()?)
            .map_err(|_| ClientError::Transport("connection closed".into()))?;

        let limit = self.config.ack_timeout;
        let handshake = async {
            while let Some(frame) = inbound.recv().await {
                match ServerEvent::from_json(&frame) {
                    Ok(ServerEvent::Authenticated { actor_id, role }) => return Ok((actor_id, role)),
                    Ok(ServerEvent::AuthError { reason }) => {
                        return Err(ClientError::Unauthorized(reason))
                    }
                    Ok(other) => debug!(event = other.name(), "frame before authentication"),
                    Err(e) => warn!(error = %e, "unparseable frame during handshake"),
                }
            }
            Err(ClientError::Transport(
                "connection closed during handshake".into(),
            ))
        };
        let (actor_id, role) = tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| ClientError::Timeout(limit))??;

        let now = Utc::now();
        let previous_connect = self.store.last_connected_at();
        let rooms: Vec<Uuid> = {
            let mut link = self.link.lock();
            link.outbound = Some(outbound);
            link.actor = Some((actor_id, role));
            link.reconnect_attempts = 0;
            link.last_connected_at = Some(now);
            let queued = std::mem::take(&mut link.pending_joins);
            link.rooms.extend(queued);
            link.rooms.iter().copied().collect()
        };
        if let Err(e) = self.store.set_last_connected_at(now) {
            warn!(error = %e, "failed to persist connect time");
        }
        self.set_status(ConnectionStatus::Connected);
        info!(%actor_id, %role, rooms = rooms.len(), "session connected");

        for conversation_id in rooms {
            let since = self
                .store
                .conversation(conversation_id)
                .and_then(|c| c.last_sync_at)
                .or(previous_connect);
            self.send_event(&ClientEvent::JoinThread { conversation_id })?;
            self.send_event(&ClientEvent::SyncRequest {
                conversation_id,
                since,
            })?;
        }

        Ok(inbound)
    }

    fn drop_link(&self) {
        self.link.lock().outbound = None;
        // Waiting senders see a closed channel.
        self.pending_acks.lock().clear();
    }

    fn handle_frame(&self, frame: &str) {
        let event = match ServerEvent::from_json(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "unparseable server frame");
                return;
            }
        };

        match event {
            ServerEvent::MessageNew { message } => self.deliver(message),
            ServerEvent::SyncMessages {
                conversation_id,
                messages,
            } => {
                debug!(%conversation_id, count = messages.len(), "catch-up received");
                for message in messages {
                    self.deliver(message);
                }
            }
            ServerEvent::MessageAck(ack) => {
                let slot = ack
                    .request_id
                    .as_deref()
                    .and_then(|id| self.pending_acks.lock().remove(id));
                match slot {
                    Some(tx) => {
                        let _ = tx.send(ack);
                    }
                    None => debug!(request_id = ?ack.request_id, "ack for unknown request"),
                }
            }
            ServerEvent::TypingIndicator {
                conversation_id,
                actor_id,
                is_typing,
            } => self.events.typing.emit(&TypingEvent {
                conversation_id,
                actor_id,
                is_typing,
            }),
            ServerEvent::MessageStatusUpdate {
                message_id,
                conversation_id,
                status,
                actor_id,
            } => {
                let event = StatusEvent {
                    message_id,
                    conversation_id,
                    status,
                    actor_id,
                };
                match status {
                    MessageStatus::Read => self.events.read_receipt.emit(&event),
                    MessageStatus::Delivered => self.events.delivery_status.emit(&event),
                    MessageStatus::Sent => {}
                }
            }
            ServerEvent::UserStatusChange {
                actor_id,
                status,
                last_seen,
            } => self.events.presence.emit(&PresenceEvent {
                actor_id,
                status,
                last_seen,
            }),
            ServerEvent::ThreadJoinError {
                conversation_id,
                reason,
            } => {
                self.link.lock().rooms.remove(&conversation_id);
                warn!(%conversation_id, %reason, "join refused");
                self.events.error.emit(&ClientError::Rejected(reason));
            }
            ServerEvent::ThreadJoined { conversation_id } => {
                debug!(%conversation_id, "joined thread")
            }
            ServerEvent::ThreadLeft { conversation_id } => {
                debug!(%conversation_id, "left thread")
            }
            ServerEvent::Error { reason } => {
                self.events.error.emit(&ClientError::Rejected(reason))
            }
            ServerEvent::AuthError { reason } => {
                self.events.error.emit(&ClientError::Unauthorized(reason))
            }
            ServerEvent::Authenticated { .. } => {}
        }
    }

    /// Hand a message to subscribers once, whichever path it arrived on.
    fn deliver(&self, message: MessagePayload) {
        if !self.seen.lock().insert(message.id) {
            return;
        }
        let unread = self.actor_id() != Some(message.sender_id);
        if let Err(e) =
            self.store
                .record_received(message.conversation_id, message.created_at, unread)
        {
            warn!(error = %e, "failed to record received message");
        }
        self.events.message.emit(&message);
    }
}

/// Send queued messages oldest first. An unacknowledged entry is resent
/// before anything behind it; a transport failure stops the flush.
async fn flush_queue(shared: Arc<Shared>) {
    let _guard = shared.flush_lock.lock().await;
    let max_retries = shared.config.max_queue_retries;

    'entries: for entry in shared.store.pending() {
        let request_id = entry.local_id.to_string();
        loop {
            let request = SendMessageRequest {
                request_id: Some(request_id.clone()),
                conversation_id: entry.conversation_id,
                content: entry.content.clone(),
                message_type: entry.message_type,
                attachments: Vec::new(),
            };

            let result = match shared.dispatch_send(&request_id, request) {
                Ok(ack) => shared.await_ack(&request_id, ack).await,
                Err(e) => Err(e),
            };

            let e = match result {
                Ok(message) => {
                    if let Err(e) = shared.store.remove(entry.local_id) {
                        warn!(error = %e, "failed to remove flushed message");
                    }
                    debug!(local_id = %entry.local_id, message_id = %message.id, "queued message sent");
                    shared.deliver(message);
                    continue 'entries;
                }
                Err(ClientError::Rejected(reason)) => {
                    warn!(local_id = %entry.local_id, %reason, "queued message rejected");
                    if let Err(e) = shared.store.remove(entry.local_id) {
                        warn!(error = %e, "failed to remove rejected message");
                    }
                    shared.events.error.emit(&ClientError::Rejected(reason));
                    continue 'entries;
                }
                Err(e) => e,
            };

            let verdict = match shared.store.record_failure(entry.local_id, max_retries) {
                Ok(verdict) => verdict,
                Err(store_err) => {
                    warn!(error = %store_err, "failed to record flush failure");
                    break 'entries;
                }
            };
            if verdict == RetryVerdict::Dropped {
                shared.events.error.emit(&e);
            }
            if matches!(e, ClientError::Transport(_)) {
                break 'entries;
            }
            match verdict {
                RetryVerdict::Retry { retry_count } => {
                    debug!(local_id = %entry.local_id, retry_count, "resending queued message");
                }
                RetryVerdict::Dropped | RetryVerdict::Missing => continue 'entries,
            }
        }
    }
}

async fn run(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    // Reconnect attempts since the last successful connect.
    let mut retries: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        shared.set_status(ConnectionStatus::Connecting {
            attempt: retries + 1,
        });

        let outcome = tokio::select! {
            outcome = shared.establish() => outcome,
            _ = shutdown.changed() => break,
        };

        match outcome {
            Ok(mut inbound) => {
                retries = 0;
                let flusher = tokio::spawn(flush_queue(shared.clone()));
                let stopped = loop {
                    tokio::select! {
                        frame = inbound.recv() => match frame {
                            Some(frame) => shared.handle_frame(&frame),
                            None => break false,
                        },
                        _ = shutdown.changed() => break true,
                    }
                };
                flusher.abort();
                shared.drop_link();
                shared.set_status(ConnectionStatus::Disconnected);
                if stopped {
                    break;
                }
                info!("connection lost");
            }
            Err(ClientError::Unauthorized(reason)) => {
                error!(%reason, "authentication refused, not reconnecting");
                shared.drop_link();
                shared.set_status(ConnectionStatus::Failed);
                shared.events.error.emit(&ClientError::Unauthorized(reason));
                return;
            }
            Err(e) => {
                warn!(error = %e, attempt = retries + 1, "connect failed");
                shared.drop_link();
                shared.events.error.emit(&e);
            }
        }

        retries += 1;
        let Some(delay) = shared.config.backoff.delay_for_attempt(retries) else {
            let attempts = retries - 1;
            error!(attempts, "reconnect attempts exhausted");
            shared.set_status(ConnectionStatus::Failed);
            shared.events.error.emit(&ClientError::Terminal { attempts });
            return;
        };
        shared.link.lock().reconnect_attempts = retries;
        info!(attempt = retries, delay_ms = delay.as_millis() as u64, "reconnecting");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    shared.set_status(ConnectionStatus::Disconnected);
}
