use super::bounded;
use crate::error::AppResult;
use crate::models::AccessAuditEntry;
use crate::storage::ChatStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Result of a trailing-window denial count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspiciousActivity {
    pub actor_id: Uuid,
    pub denied_attempts: i64,
    pub threshold: i64,
    pub window_secs: i64,
    /// `denied_attempts > threshold`
    pub flagged: bool,
}

/// Append-only access trail with a per-actor retention cap.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn ChatStore>,
    max_per_actor: usize,
    timeout: Duration,
}

impl AuditLog {
    pub fn new(store: Arc<dyn ChatStore>, max_per_actor: usize, timeout: Duration) -> Self {
        Self {
            store,
            max_per_actor: max_per_actor.max(1),
            timeout,
        }
    }

    /// Log and persist one decision. A persistence failure is logged on the
    /// audit target and never fails the request that was being checked.
    pub async fn record(&self, entry: AccessAuditEntry) {
        entry.log();
        if let Err(e) = bounded(
            self.timeout,
            self.store.append_audit(&entry, self.max_per_actor),
        )
        .await
        {
            tracing::error!(
                target: "security_audit",
                actor_id = %entry.actor_id,
                entry_id = %entry.id,
                error = %e,
                "failed to persist audit entry"
            );
        }
    }

    pub async fn suspicious_activity(
        &self,
        actor_id: Uuid,
        threshold: i64,
        window: chrono::Duration,
    ) -> AppResult<SuspiciousActivity> {
        let since = Utc::now() - window;
        let denied_attempts =
            bounded(self.timeout, self.store.count_denials_since(actor_id, since)).await?;
        let flagged = denied_attempts > threshold;
        if flagged {
            tracing::warn!(
                target: "security_audit",
                actor_id = %actor_id,
                denied_attempts,
                threshold,
                "suspicious access pattern"
            );
        }
        Ok(SuspiciousActivity {
            actor_id,
            denied_attempts,
            threshold,
            window_secs: window.num_seconds(),
            flagged,
        })
    }

    pub async fn entries_for(&self, actor_id: Uuid) -> AppResult<Vec<AccessAuditEntry>> {
        bounded(self.timeout, self.store.audit_entries_for(actor_id)).await
    }

    pub async fn prune(&self) -> AppResult<u64> {
        bounded(self.timeout, self.store.prune_audit(self.max_per_actor)).await
    }
}

/// Periodically enforce the retention cap across all actors.
pub fn spawn_audit_pruner(audit: AuditLog, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match audit.prune().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "audit log pruned"),
                Err(e) => tracing::warn!(error = %e, "audit prune failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessDecision, AccessTarget};
    use crate::storage::MemoryStore;
    use event_schema::ParticipantRole;

    fn entry(actor: Uuid, decision: AccessDecision) -> AccessAuditEntry {
        AccessAuditEntry::new(
            actor,
            ParticipantRole::Vendor,
            AccessTarget::Conversation(Uuid::new_v4()),
            None,
            decision,
            None,
        )
    }

    #[tokio::test]
    async fn flags_only_above_threshold() {
        let audit = AuditLog::new(Arc::new(MemoryStore::new()), 100, Duration::from_secs(1));
        let actor = Uuid::new_v4();
        for _ in 0..3 {
            audit.record(entry(actor, AccessDecision::Denied)).await;
        }
        audit.record(entry(actor, AccessDecision::Granted)).await;

        let at_threshold = audit
            .suspicious_activity(actor, 3, chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(at_threshold.denied_attempts, 3);
        assert!(!at_threshold.flagged);

        let below = audit
            .suspicious_activity(actor, 2, chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert!(below.flagged);
    }

    #[tokio::test]
    async fn retention_cap_applies_on_append() {
        let audit = AuditLog::new(Arc::new(MemoryStore::new()), 2, Duration::from_secs(1));
        let actor = Uuid::new_v4();
        for _ in 0..4 {
            audit.record(entry(actor, AccessDecision::Granted)).await;
        }
        assert_eq!(audit.entries_for(actor).await.unwrap().len(), 2);
    }
}
