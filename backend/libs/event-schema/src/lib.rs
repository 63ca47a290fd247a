/// Live-transport protocol shared by the chat server and its clients
///
/// Every frame is a JSON object `{"event": "<name>", "data": {...}}`. Event
/// names follow the `object:action` convention (`message:send`,
/// `typing:indicator`, ...). Client and server frames are separate enums so
/// each side can only emit what the other side understands.
pub mod events;
pub mod types;

pub use events::{ClientEvent, MessageAck, SendMessageRequest, ServerEvent};
pub use types::{
    AttachmentRef, AttachmentUpload, MessagePayload, MessageStatus, MessageType,
    ParticipantRole, PresenceStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown participant role: {0}")]
    UnknownRole(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("unknown message status: {0}")]
    UnknownStatus(String),
}
