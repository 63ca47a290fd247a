//! User id to participant id indirection.
//!
//! Resolution order inside a conversation:
//! 1. the user id itself, if it is the conversation's id for the actor's role
//! 2. the profile directory's participant id for (user, role)
//!
//! The resolved id is only accepted if it is one of the conversation's two
//! sides. Outside a conversation (listing, creating) the directory wins and
//! the user id is the fallback.

use crate::collaborators::ProfileDirectory;
use crate::error::AppResult;
use crate::models::{Actor, Conversation};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct ParticipantResolver {
    profiles: Arc<dyn ProfileDirectory>,
    timeout: Duration,
}

impl ParticipantResolver {
    pub fn new(profiles: Arc<dyn ProfileDirectory>, timeout: Duration) -> Self {
        Self { profiles, timeout }
    }

    /// Participant id `actor` holds in `conversation`, or `None` when they
    /// are not a side of it.
    pub async fn resolve_in(
        &self,
        actor: &Actor,
        conversation: &Conversation,
    ) -> AppResult<Option<Uuid>> {
        if conversation.participant_for(actor.role) == actor.user_id {
            return Ok(Some(actor.user_id));
        }
        let looked_up = self.lookup(actor).await?;
        Ok(looked_up.filter(|id| conversation.has_participant(*id)))
    }

    /// Participant id used for `actor` outside any particular conversation.
    pub async fn resolve_identity(&self, actor: &Actor) -> AppResult<Uuid> {
        Ok(self.lookup(actor).await?.unwrap_or(actor.user_id))
    }

    async fn lookup(&self, actor: &Actor) -> AppResult<Option<Uuid>> {
        let found = resilience::with_timeout_into(self.timeout, async {
            self.profiles
                .participant_id_for(actor.user_id, actor.role)
                .await
                .map_err(crate::error::AppError::from)
        })
        .await?;
        Ok(found)
    }
}
