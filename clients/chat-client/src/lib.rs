/// Client side of the Wedlink chat stack
///
/// - [`ConnectionSession`]: connect, authenticate, rejoin rooms, catch up and
///   reconnect with backoff
/// - [`OfflineSyncStore`]: durable outbound queue and per-conversation sync
///   bookkeeping, keyed by installation
/// - [`transport`]: WebSocket and in-process frame transports
/// - [`subscriptions`]: typed callback registries with unsubscribe handles
pub mod config;
pub mod error;
pub mod offline_store;
pub mod session;
pub mod subscriptions;
pub mod transport;

pub use config::SessionConfig;
pub use error::ClientError;
pub use offline_store::{ConversationSyncState, OfflineSyncStore, QueuedOutboundMessage, RetryVerdict};
pub use session::{ConnectionSession, ConnectionState, SendOutcome};
pub use subscriptions::{
    ConnectionStatus, PresenceEvent, SessionEvents, StatusEvent, Subscribers, Subscription,
    TypingEvent,
};
pub use transport::{InMemoryTransport, ServerLink, Transport, TransportLink, WebSocketTransport};
