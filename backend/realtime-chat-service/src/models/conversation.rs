use chrono::{DateTime, Utc};
use event_schema::ParticipantRole;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Thread between one couple and one vendor.
///
/// `couple_id` and `vendor_id` are participant ids, which may differ from the
/// user ids carried in auth tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub couple_id: Uuid,
    pub vendor_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub is_active: bool,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(couple_id: Uuid, vendor_id: Uuid, lead_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            couple_id,
            vendor_id,
            lead_id,
            is_active: true,
            last_activity_at: now,
            created_at: now,
        }
    }

    pub fn participant_for(&self, role: ParticipantRole) -> Uuid {
        match role {
            ParticipantRole::Couple => self.couple_id,
            ParticipantRole::Vendor => self.vendor_id,
        }
    }

    pub fn has_participant(&self, participant_id: Uuid) -> bool {
        self.couple_id == participant_id || self.vendor_id == participant_id
    }

    /// The other side of the thread, if `participant_id` is one side.
    pub fn counterpart_of(&self, participant_id: Uuid) -> Option<Uuid> {
        if participant_id == self.couple_id {
            Some(self.vendor_id)
        } else if participant_id == self.vendor_id {
            Some(self.couple_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterpart_lookup() {
        let conv = Conversation::new(Uuid::new_v4(), Uuid::new_v4(), None);
        assert_eq!(conv.counterpart_of(conv.couple_id), Some(conv.vendor_id));
        assert_eq!(conv.counterpart_of(conv.vendor_id), Some(conv.couple_id));
        assert_eq!(conv.counterpart_of(Uuid::new_v4()), None);
        assert_eq!(conv.participant_for(ParticipantRole::Vendor), conv.vendor_id);
    }
}
