#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use resilience::BackoffPolicy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;
use wedlink::client::{
    ClientError, ConnectionSession, OfflineSyncStore, SessionConfig, Transport, TransportLink,
};
use wedlink::crypto::MasterSecret;
use wedlink::protocol::ParticipantRole;
use wedlink::server::{
    collaborators::Collaborators,
    config::Config,
    models::{Actor, Conversation},
    state::AppState,
    storage::{ChatStore, MemoryStore},
    websocket::{ConnectionId, RealtimeGateway, RoomKey},
};

/// Server services over the in-memory store.
pub struct Stack {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub couple: Actor,
    pub vendor: Actor,
}

impl Stack {
    pub fn new() -> Self {
        let mut config = Config::development();
        config.key_derivation_iterations = 1_000;
        config.collaborator_timeout = Duration::from_secs(2);

        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn ChatStore> = store.clone();
        let collaborators = Collaborators::process_local(shared.clone());
        let state = AppState::new(
            Arc::new(config),
            shared,
            collaborators,
            MasterSecret::from_bytes([9u8; 32]),
        );

        Self {
            state,
            store,
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

    /// Wait until the conversation room holds `members` connections.
    pub async fn wait_for_room(&self, conversation_id: Uuid, members: usize) {
        let room = RoomKey::Conversation(conversation_id);
        for _ in 0..250 {
            if self.state.gateway.registry().room_size(room).await == members {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("room never reached {members} members");
    }

    pub fn token_for(&self, actor: Actor) -> String {
        self.state
            .jwt
            .issue(actor, chrono::Duration::minutes(10))
            .expect("issue token")
    }

    pub fn session_config(&self, actor: Actor, installation_id: &str) -> SessionConfig {
        SessionConfig::new("ws://in-process/ws", self.token_for(actor), installation_id)
            .with_backoff(BackoffPolicy::new(
                Duration::from_millis(20),
                2.0,
                Duration::from_millis(200),
                50,
            ))
            .with_ack_timeout(Duration::from_secs(2))
    }

    /// Client session talking to this stack's gateway.
    pub fn session(
        &self,
        actor: Actor,
        installation_id: &str,
    ) -> (ConnectionSession, Arc<GatewayTransport>) {
        let config = self.session_config(actor, installation_id);
        let store = Arc::new(OfflineSyncStore::in_memory(installation_id));
        let transport = Arc::new(GatewayTransport::new(self.state.gateway.clone()));
        let session = ConnectionSession::new(config, transport.clone(), store);
        (session, transport)
    }
}

/// Feeds client frames straight into the gateway, the way the WebSocket
/// actor does, minus the socket.
pub struct GatewayTransport {
    gateway: RealtimeGateway,
    online: AtomicBool,
    live: Mutex<Vec<ConnectionId>>,
}

impl GatewayTransport {
    pub fn new(gateway: RealtimeGateway) -> Self {
        Self {
            gateway,
            online: AtomicBool::new(true),
            live: Mutex::new(Vec::new()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Go offline and tear down every open connection server-side.
    pub async fn cut(&self) {
        self.set_online(false);
        let live = std::mem::take(&mut *self.live.lock());
        for conn in live {
            self.gateway.disconnect(conn).await;
        }
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn connect(&self) -> Result<TransportLink, ClientError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("network unreachable".into()));
        }

        let (conn, inbound) = self.gateway.connect().await;
        self.live.lock().push(conn);

        let (outbound, mut frames) = mpsc::unbounded_channel::<String>();
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                gateway.handle_text(conn, &frame).await;
            }
            gateway.disconnect(conn).await;
        });

        Ok(TransportLink { outbound, inbound })
    }
}

pub fn collect<T: Clone + Send + 'static>(
    subscribers: &wedlink::client::Subscribers<T>,
) -> (wedlink::client::Subscription, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = subscribers.subscribe(move |value: &T| {
        let _ = tx.send(value.clone());
    });
    (handle, rx)
}

pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("subscription closed")
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never held: {what}");
}
