//! Server side of the live transport.
//!
//! Per connection: unauthenticated -> authenticated (personal room joined)
//! -> any number of conversation rooms -> disconnected. Every inbound frame
//! is a [`ClientEvent`]; everything sent back is a [`ServerEvent`].

use super::presence::{PresenceRecord, PresenceTracker};
use super::registry::{ConnectionId, ConnectionRegistry, RoomKey};
use super::typing::TypingTracker;
use crate::error::AppError;
use crate::models::{AccessTarget, Actor};
use crate::security::JwtVerifier;
use crate::services::{ConversationService, SentMessage};
use event_schema::{
    ClientEvent, MessageAck, MessageStatus, PresenceStatus, SendMessageRequest, ServerEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const REASON_NOT_AUTHENTICATED: &str = "not authenticated";
const REASON_NOT_JOINED: &str = "join the thread first";

#[derive(Clone)]
pub struct RealtimeGateway {
    service: Arc<ConversationService>,
    jwt: Arc<JwtVerifier>,
    registry: ConnectionRegistry,
    presence: Arc<PresenceTracker>,
    typing: Arc<TypingTracker>,
}

impl RealtimeGateway {
    pub fn new(
        service: Arc<ConversationService>,
        jwt: Arc<JwtVerifier>,
        typing_timeout: Duration,
    ) -> Self {
        Self {
            service,
            jwt,
            registry: ConnectionRegistry::new(),
            presence: Arc::new(PresenceTracker::new()),
            typing: Arc::new(TypingTracker::new(typing_timeout)),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn presence_of(&self, user_id: Uuid) -> PresenceRecord {
        self.presence.get(user_id)
    }

    pub fn service(&self) -> &Arc<ConversationService> {
        &self.service
    }

    pub async fn connect(&self) -> (ConnectionId, UnboundedReceiver<String>) {
        self.registry.register().await
    }

    /// Parse and dispatch one inbound text frame.
    pub async fn handle_text(&self, conn: ConnectionId, text: &str) {
        match ClientEvent::from_json(text) {
            Ok(event) => self.handle_event(conn, event).await,
            Err(e) => {
                debug!(connection_id = %conn, error = %e, "malformed client frame");
                self.reply(conn, &ServerEvent::Error {
                    reason: format!("malformed event: {e}"),
                })
                .await;
            }
        }
    }

    pub async fn handle_event(&self, conn: ConnectionId, event: ClientEvent) {
        if let ClientEvent::Authenticate { token } = event {
            self.authenticate(conn, &token).await;
            return;
        }

        let Some(actor) = self.registry.actor_of(conn).await else {
            self.reply(conn, &ServerEvent::AuthError {
                reason: REASON_NOT_AUTHENTICATED.to_string(),
            })
            .await;
            return;
        };

        match event {
            ClientEvent::Authenticate { .. } => {}
            ClientEvent::JoinThread { conversation_id } => {
                self.join_thread(conn, &actor, conversation_id).await
            }
            ClientEvent::LeaveThread { conversation_id } => {
                self.registry
                    .leave(conn, RoomKey::Conversation(conversation_id))
                    .await;
                if self.typing.stop(conversation_id, actor.user_id) {
                    self.broadcast_typing(conversation_id, actor.user_id, false, Some(conn))
                        .await;
                }
                self.reply(conn, &ServerEvent::ThreadLeft { conversation_id })
                    .await;
            }
            ClientEvent::SendMessage(request) => {
                if request.request_id.is_some() {
                    let ack = self.send_message(&actor, request).await;
                    self.reply(conn, &ServerEvent::MessageAck(ack)).await;
                } else {
                    self.send_message_detached(actor, request, Some(conn));
                }
            }
            ClientEvent::TypingStart { conversation_id } => {
                if !self.in_room(conn, conversation_id).await {
                    return;
                }
                let registry = self.registry.clone();
                let actor_id = actor.user_id;
                self.typing.start(conversation_id, actor_id, move || async move {
                    let frame = encode(&ServerEvent::TypingIndicator {
                        conversation_id,
                        actor_id,
                        is_typing: false,
                    });
                    if let Some(frame) = frame {
                        registry
                            .broadcast(RoomKey::Conversation(conversation_id), frame, None)
                            .await;
                    }
                });
                self.broadcast_typing(conversation_id, actor_id, true, Some(conn))
                    .await;
            }
            ClientEvent::TypingStop { conversation_id } => {
                if !self.in_room(conn, conversation_id).await {
                    return;
                }
                self.typing.stop(conversation_id, actor.user_id);
                self.broadcast_typing(conversation_id, actor.user_id, false, Some(conn))
                    .await;
            }
            ClientEvent::MessageDelivered { message_id } => {
                if let Err(e) = self.mark_delivered(&actor, message_id).await {
                    self.reply_error(conn, &e).await;
                }
            }
            ClientEvent::MessageRead { message_id } => {
                if let Err(e) = self.mark_read(&actor, message_id).await {
                    self.reply_error(conn, &e).await;
                }
            }
            ClientEvent::SyncRequest {
                conversation_id,
                since,
            } => {
                match self
                    .service
                    .sync_since(&actor, conversation_id, since.unwrap_or_default())
                    .await
                {
                    Ok(messages) => {
                        self.reply(conn, &ServerEvent::SyncMessages {
                            conversation_id,
                            messages,
                        })
                        .await
                    }
                    Err(e) => self.reply_error(conn, &e).await,
                }
            }
        }
    }

    /// Tear down a connection: rooms, typing timers and, for the actor's
    /// last connection, presence.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let Some(departure) = self.registry.unregister(conn).await else {
            return;
        };
        let Some(actor) = departure.actor else {
            return;
        };

        for conversation_id in self.typing.clear_actor(actor.user_id) {
            self.broadcast_typing(conversation_id, actor.user_id, false, None)
                .await;
        }

        if departure.remaining_for_actor == 0 {
            let record = self.presence.set_offline(actor.user_id);
            self.broadcast_presence(&actor, record).await;
            info!(actor_id = %actor.user_id, "actor offline");
        }
    }

    /// Acknowledged send: the caller learns whether the message was stored.
    pub async fn send_message(&self, actor: &Actor, request: SendMessageRequest) -> MessageAck {
        let request_id = request.request_id.clone();
        match self.service.send_message(actor, request.into()).await {
            Ok(sent) => {
                self.broadcast_new_message(&sent).await;
                MessageAck::accepted(request_id, sent.message)
            }
            Err(e) => {
                debug!(actor_id = %actor.user_id, error = %e, "send rejected");
                MessageAck::rejected(request_id, e.client_reason())
            }
        }
    }

    /// Fire-and-forget send. A rejection is reported to `reply_to` as an
    /// error event if given, and logged either way.
    pub fn send_message_detached(
        &self,
        actor: Actor,
        request: SendMessageRequest,
        reply_to: Option<ConnectionId>,
    ) -> JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            match gateway.service.send_message(&actor, request.into()).await {
                Ok(sent) => gateway.broadcast_new_message(&sent).await,
                Err(e) => {
                    warn!(actor_id = %actor.user_id, error = %e, "detached send rejected");
                    if let Some(conn) = reply_to {
                        gateway.reply_error(conn, &e).await;
                    }
                }
            }
        })
    }

    pub async fn mark_read(&self, actor: &Actor, message_id: Uuid) -> Result<(), AppError> {
        let outcome = self.service.mark_message_read(actor, message_id).await?;
        if outcome.newly_marked {
            self.broadcast_status(
                outcome.conversation_id,
                message_id,
                MessageStatus::Read,
                actor.user_id,
            )
            .await;
        }
        Ok(())
    }

    pub async fn mark_conversation_read(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let marked = self
            .service
            .mark_conversation_read(actor, conversation_id)
            .await?;
        for message_id in &marked {
            self.broadcast_status(conversation_id, *message_id, MessageStatus::Read, actor.user_id)
                .await;
        }
        Ok(marked)
    }

    pub async fn mark_delivered(&self, actor: &Actor, message_id: Uuid) -> Result<(), AppError> {
        if let Some(conversation_id) = self.service.mark_delivered(actor, message_id).await? {
            self.broadcast_status(
                conversation_id,
                message_id,
                MessageStatus::Delivered,
                actor.user_id,
            )
            .await;
        }
        Ok(())
    }

    /// Fan a stored message out to the thread room and the recipient's
    /// personal room.
    pub async fn broadcast_new_message(&self, sent: &SentMessage) {
        let Some(frame) = encode(&ServerEvent::MessageNew {
            message: sent.message.clone(),
        }) else {
            return;
        };
        let mut rooms = vec![RoomKey::Conversation(sent.message.conversation_id)];
        if let Some(recipient_id) = sent.recipient_id {
            rooms.push(RoomKey::Personal(recipient_id));
        }
        let reached = self.registry.broadcast_many(&rooms, frame, None).await;
        debug!(message_id = %sent.message.id, reached, "message fanned out");
    }

    async fn authenticate(&self, conn: ConnectionId, token: &str) {
        if self.registry.actor_of(conn).await.is_some() {
            self.reply(conn, &ServerEvent::AuthError {
                reason: "already authenticated".to_string(),
            })
            .await;
            return;
        }
        let actor = match self.jwt.verify(token) {
            Ok(actor) => actor,
            Err(e) => {
                self.reply(conn, &ServerEvent::AuthError {
                    reason: e.client_reason(),
                })
                .await;
                return;
            }
        };

        let connections = self.registry.bind_actor(conn, actor).await;
        self.reply(conn, &ServerEvent::Authenticated {
            actor_id: actor.user_id,
            role: actor.role,
        })
        .await;
        info!(actor_id = %actor.user_id, role = %actor.role, connections, "connection authenticated");

        if connections == 1 {
            let record = self.presence.set_online(actor.user_id);
            self.broadcast_presence(&actor, record).await;
        }
    }

    async fn join_thread(&self, conn: ConnectionId, actor: &Actor, conversation_id: Uuid) {
        match self
            .service
            .access()
            .require(actor, AccessTarget::Conversation(conversation_id))
            .await
        {
            Ok(_) => {
                let joined = self
                    .registry
                    .join(conn, RoomKey::Conversation(conversation_id))
                    .await;
                if !joined {
                    debug!(%conversation_id, "connection closed before the join completed");
                    return;
                }
                self.reply(conn, &ServerEvent::ThreadJoined { conversation_id })
                    .await;
            }
            Err(e) => {
                self.reply(conn, &ServerEvent::ThreadJoinError {
                    conversation_id,
                    reason: e.client_reason(),
                })
                .await;
            }
        }
    }

    async fn in_room(&self, conn: ConnectionId, conversation_id: Uuid) -> bool {
        if self
            .registry
            .is_member(conn, RoomKey::Conversation(conversation_id))
            .await
        {
            return true;
        }
        self.reply(conn, &ServerEvent::Error {
            reason: REASON_NOT_JOINED.to_string(),
        })
        .await;
        false
    }

    async fn broadcast_typing(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        is_typing: bool,
        exclude: Option<ConnectionId>,
    ) {
        if let Some(frame) = encode(&ServerEvent::TypingIndicator {
            conversation_id,
            actor_id,
            is_typing,
        }) {
            self.registry
                .broadcast(RoomKey::Conversation(conversation_id), frame, exclude)
                .await;
        }
    }

    async fn broadcast_status(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        status: MessageStatus,
        actor_id: Uuid,
    ) {
        if let Some(frame) = encode(&ServerEvent::MessageStatusUpdate {
            message_id,
            conversation_id,
            status,
            actor_id,
        }) {
            self.registry
                .broadcast(RoomKey::Conversation(conversation_id), frame, None)
                .await;
        }
    }

    /// Publish presence to every thread the actor belongs to.
    async fn broadcast_presence(&self, actor: &Actor, record: PresenceRecord) {
        let Some(frame) = encode(&ServerEvent::UserStatusChange {
            actor_id: actor.user_id,
            status: record.status,
            last_seen: record.last_seen,
        }) else {
            return;
        };
        let rooms: Vec<RoomKey> = match self.service.list_conversations(actor).await {
            Ok(summaries) => summaries
                .iter()
                .filter(|s| s.conversation.is_active)
                .map(|s| RoomKey::Conversation(s.conversation.id))
                .collect(),
            Err(e) => {
                warn!(actor_id = %actor.user_id, error = %e, "presence fan-out skipped");
                return;
            }
        };
        if rooms.is_empty() {
            return;
        }
        let status = match record.status {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        };
        let reached = self.registry.broadcast_many(&rooms, frame, None).await;
        debug!(actor_id = %actor.user_id, status, reached, "presence published");
    }

    async fn reply(&self, conn: ConnectionId, event: &ServerEvent) {
        if let Some(frame) = encode(event) {
            if !self.registry.send_to(conn, frame).await {
                debug!(connection_id = %conn, event = event.name(), "reply to closed connection");
            }
        }
    }

    async fn reply_error(&self, conn: ConnectionId, err: &AppError) {
        self.reply(conn, &ServerEvent::Error {
            reason: err.client_reason(),
        })
        .await;
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match event.to_json() {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to encode server event");
            None
        }
    }
}
