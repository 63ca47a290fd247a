pub mod gateway;
pub mod presence;
pub mod registry;
pub mod session;
pub mod typing;

pub use gateway::RealtimeGateway;
pub use presence::{PresenceRecord, PresenceTracker};
pub use registry::{ConnectionId, ConnectionRegistry, Departure, RoomKey};
pub use session::WsSession;
pub use typing::TypingTracker;
