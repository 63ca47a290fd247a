use crate::models::Actor;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

/// Unique identifier for one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Fan-out target. Every authenticated connection sits in its actor's
/// personal room; conversation rooms are joined explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Conversation(Uuid),
    Personal(Uuid),
}

struct Connection {
    sender: UnboundedSender<String>,
    actor: Option<Actor>,
    rooms: HashSet<RoomKey>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
    // actor user id -> connections
    actors: HashMap<Uuid, HashSet<ConnectionId>>,
}

impl RegistryState {
    /// False only when the connection is gone. Rejoining is a no-op.
    fn join(&mut self, id: ConnectionId, room: RoomKey) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        conn.rooms.insert(room);
        self.rooms.entry(room).or_default().insert(id);
        true
    }

    fn leave(&mut self, id: ConnectionId, room: RoomKey) -> bool {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.rooms.remove(&room);
        }
        let Some(members) = self.rooms.get_mut(&room) else {
            return false;
        };
        let removed = members.remove(&id);
        // Clean up empty rooms
        if members.is_empty() {
            self.rooms.remove(&room);
        }
        removed
    }
}

/// What was torn down when a connection went away.
#[derive(Debug, Clone)]
pub struct Departure {
    pub actor: Option<Actor>,
    /// Connections the actor still has open elsewhere.
    pub remaining_for_actor: usize,
    pub rooms: Vec<RoomKey>,
}

/// Connection registry for live subscribers.
///
/// Tracks which connections are in which rooms and which actor owns each
/// connection. All mutation goes through one write lock so connect,
/// disconnect and broadcast never observe a half-updated mapping.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, unauthenticated connection. Returns its id and the
    /// channel outbound frames are delivered on.
    pub async fn register(&self) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let id = ConnectionId::new();
        let mut guard = self.inner.write().await;
        guard.connections.insert(
            id,
            Connection {
                sender: tx,
                actor: None,
                rooms: HashSet::new(),
            },
        );
        tracing::debug!(
            connection_id = %id,
            total = guard.connections.len(),
            "connection registered"
        );
        (id, rx)
    }

    /// Associate `actor` with the connection and join its personal room.
    /// Returns how many connections the actor now has.
    pub async fn bind_actor(&self, id: ConnectionId, actor: Actor) -> usize {
        let mut guard = self.inner.write().await;
        let Some(conn) = guard.connections.get_mut(&id) else {
            return 0;
        };
        conn.actor = Some(actor);
        guard.join(id, RoomKey::Personal(actor.user_id));
        let owned = guard.actors.entry(actor.user_id).or_default();
        owned.insert(id);
        owned.len()
    }

    pub async fn actor_of(&self, id: ConnectionId) -> Option<Actor> {
        self.inner
            .read()
            .await
            .connections
            .get(&id)
            .and_then(|c| c.actor)
    }

    pub async fn join(&self, id: ConnectionId, room: RoomKey) -> bool {
        self.inner.write().await.join(id, room)
    }

    pub async fn leave(&self, id: ConnectionId, room: RoomKey) -> bool {
        self.inner.write().await.leave(id, room)
    }

    pub async fn is_member(&self, id: ConnectionId, room: RoomKey) -> bool {
        self.inner
            .read()
            .await
            .rooms
            .get(&room)
            .map(|m| m.contains(&id))
            .unwrap_or(false)
    }

    pub async fn rooms_of(&self, id: ConnectionId) -> Vec<RoomKey> {
        self.inner
            .read()
            .await
            .connections
            .get(&id)
            .map(|c| c.rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn room_size(&self, room: RoomKey) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(&room)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn is_actor_connected(&self, user_id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .actors
            .get(&user_id)
            .map(|c| !c.is_empty())
            .unwrap_or(false)
    }

    /// Remove the connection from every room and from its actor's set.
    ///
    /// Must be called when a connection closes.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Departure> {
        let mut guard = self.inner.write().await;
        let conn = guard.connections.remove(&id)?;
        let rooms: Vec<RoomKey> = conn.rooms.iter().copied().collect();
        for room in &rooms {
            guard.leave(id, *room);
        }

        let remaining_for_actor = match conn.actor {
            Some(actor) => {
                let remaining = match guard.actors.get_mut(&actor.user_id) {
                    Some(owned) => {
                        owned.remove(&id);
                        owned.len()
                    }
                    None => 0,
                };
                if remaining == 0 {
                    guard.actors.remove(&actor.user_id);
                }
                remaining
            }
            None => 0,
        };

        tracing::debug!(
            connection_id = %id,
            rooms = rooms.len(),
            remaining_for_actor,
            "connection unregistered"
        );
        Some(Departure {
            actor: conn.actor,
            remaining_for_actor,
            rooms,
        })
    }

    /// Send one frame to one connection. False if it is gone.
    pub async fn send_to(&self, id: ConnectionId, msg: String) -> bool {
        self.inner
            .read()
            .await
            .connections
            .get(&id)
            .map(|c| c.sender.send(msg).is_ok())
            .unwrap_or(false)
    }

    /// Broadcast to a room. Returns the number of connections reached.
    pub async fn broadcast(&self, room: RoomKey, msg: String, exclude: Option<ConnectionId>) -> usize {
        self.broadcast_many(&[room], msg, exclude).await
    }

    /// Broadcast to the union of `rooms`; a connection in several of them
    /// receives the frame once. Dead senders are skipped and cleaned up when
    /// their connection unregisters.
    pub async fn broadcast_many(
        &self,
        rooms: &[RoomKey],
        msg: String,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let guard = self.inner.read().await;
        let targets: HashSet<ConnectionId> = rooms
            .iter()
            .filter_map(|room| guard.rooms.get(room))
            .flatten()
            .copied()
            .filter(|id| Some(*id) != exclude)
            .collect();

        let mut delivered = 0;
        for id in targets {
            if let Some(conn) = guard.connections.get(&id) {
                if conn.sender.send(msg.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_schema::ParticipantRole;

    #[tokio::test]
    async fn broadcast_reaches_room_members_once() {
        let registry = ConnectionRegistry::new();
        let conv = Uuid::new_v4();
        let actor = Actor::new(Uuid::new_v4(), ParticipantRole::Couple);

        let (a, mut rx_a) = registry.register().await;
        let (b, mut rx_b) = registry.register().await;
        registry.bind_actor(a, actor).await;
        registry.join(a, RoomKey::Conversation(conv)).await;
        registry.join(b, RoomKey::Conversation(conv)).await;

        let reached = registry
            .broadcast_many(
                &[RoomKey::Conversation(conv), RoomKey::Personal(actor.user_id)],
                "hi".into(),
                None,
            )
            .await;
        assert_eq!(reached, 2);
        assert_eq!(rx_a.recv().await.as_deref(), Some("hi"));
        assert_eq!(rx_b.recv().await.as_deref(), Some("hi"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn exclude_skips_the_sender() {
        let registry = ConnectionRegistry::new();
        let room = RoomKey::Conversation(Uuid::new_v4());
        let (a, mut rx_a) = registry.register().await;
        let (b, mut rx_b) = registry.register().await;
        registry.join(a, room).await;
        registry.join(b, room).await;

        assert_eq!(registry.broadcast(room, "typing".into(), Some(a)).await, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.recv().await.as_deref(), Some("typing"));
    }

    #[tokio::test]
    async fn unregister_cleans_rooms_and_actor_sets() {
        let registry = ConnectionRegistry::new();
        let actor = Actor::new(Uuid::new_v4(), ParticipantRole::Vendor);
        let room = RoomKey::Conversation(Uuid::new_v4());

        let (a, _rx_a) = registry.register().await;
        let (b, _rx_b) = registry.register().await;
        assert_eq!(registry.bind_actor(a, actor).await, 1);
        assert_eq!(registry.bind_actor(b, actor).await, 2);
        registry.join(a, room).await;

        let gone = registry.unregister(a).await.unwrap();
        assert_eq!(gone.remaining_for_actor, 1);
        assert!(gone.rooms.contains(&room));
        assert_eq!(registry.room_size(room).await, 0);
        assert!(registry.is_actor_connected(actor.user_id).await);

        let gone = registry.unregister(b).await.unwrap();
        assert_eq!(gone.remaining_for_actor, 0);
        assert!(!registry.is_actor_connected(actor.user_id).await);
        assert!(registry.unregister(b).await.is_none());
    }

    #[tokio::test]
    async fn join_fails_only_for_a_departed_connection() {
        let registry = ConnectionRegistry::new();
        let room = RoomKey::Conversation(Uuid::new_v4());
        let (a, _rx_a) = registry.register().await;

        assert!(registry.join(a, room).await);
        assert!(registry.join(a, room).await);
        assert_eq!(registry.room_size(room).await, 1);

        registry.unregister(a).await;
        assert!(!registry.join(a, room).await);
        assert_eq!(registry.room_size(room).await, 0);
    }
}
