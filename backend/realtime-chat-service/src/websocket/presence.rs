use chrono::{DateTime, Utc};
use dashmap::DashMap;
use event_schema::PresenceStatus;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceRecord {
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Default for PresenceRecord {
    fn default() -> Self {
        Self {
            status: PresenceStatus::Offline,
            last_seen: None,
        }
    }
}

/// Keyed online/offline status with last-seen timestamps.
#[derive(Default)]
pub struct PresenceTracker {
    records: DashMap<Uuid, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, user_id: Uuid) -> PresenceRecord {
        self.set(user_id, PresenceStatus::Online)
    }

    pub fn set_offline(&self, user_id: Uuid) -> PresenceRecord {
        self.set(user_id, PresenceStatus::Offline)
    }

    pub fn get(&self, user_id: Uuid) -> PresenceRecord {
        self.records
            .get(&user_id)
            .map(|r| *r)
            .unwrap_or_default()
    }

    fn set(&self, user_id: Uuid, status: PresenceStatus) -> PresenceRecord {
        let record = PresenceRecord {
            status,
            last_seen: Some(Utc::now()),
        };
        self.records.insert(user_id, record);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_is_offline_without_last_seen() {
        let presence = PresenceTracker::new();
        assert_eq!(presence.get(Uuid::new_v4()), PresenceRecord::default());
    }

    #[test]
    fn offline_keeps_last_seen() {
        let presence = PresenceTracker::new();
        let user = Uuid::new_v4();
        presence.set_online(user);
        let offline = presence.set_offline(user);
        assert_eq!(offline.status, PresenceStatus::Offline);
        assert!(offline.last_seen.is_some());
        assert_eq!(presence.get(user), offline);
    }
}
