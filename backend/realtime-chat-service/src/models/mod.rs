pub mod audit;
pub mod conversation;
pub mod message;

pub use audit::{AccessAuditEntry, AccessDecision, AccessTarget};
pub use conversation::{Conversation, ConversationSummary};
pub use message::{MessagePage, StoredMessage};

use event_schema::ParticipantRole;
use uuid::Uuid;

/// Authenticated caller: the user id from the token plus the side they act for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: ParticipantRole,
}

impl Actor {
    pub fn new(user_id: Uuid, role: ParticipantRole) -> Self {
        Self { user_id, role }
    }

    /// Build an actor from an untrusted role string. Unknown roles are a
    /// validation error.
    pub fn parse(user_id: Uuid, role: &str) -> Result<Self, crate::error::AppError> {
        let role = role
            .parse::<ParticipantRole>()
            .map_err(|e| crate::error::AppError::Validation(e.to_string()))?;
        Ok(Self { user_id, role })
    }
}
