use super::CollaboratorError;
use async_trait::async_trait;
use dashmap::DashMap;
use event_schema::ParticipantRole;
use uuid::Uuid;

/// Maps an authenticated user to the id they carry inside conversations.
///
/// Couples in particular authenticate with a user id but appear in
/// conversations under their couple-profile id.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn participant_id_for(
        &self,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> Result<Option<Uuid>, CollaboratorError>;
}

#[derive(Default)]
pub struct StaticProfileDirectory {
    links: DashMap<(Uuid, ParticipantRole), Uuid>,
}

impl StaticProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self, user_id: Uuid, role: ParticipantRole, participant_id: Uuid) {
        self.links.insert((user_id, role), participant_id);
    }

    pub fn unlink(&self, user_id: Uuid, role: ParticipantRole) {
        self.links.remove(&(user_id, role));
    }
}

#[async_trait]
impl ProfileDirectory for StaticProfileDirectory {
    async fn participant_id_for(
        &self,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> Result<Option<Uuid>, CollaboratorError> {
        Ok(self.links.get(&(user_id, role)).map(|id| *id))
    }
}
