//! Authorization gate for every conversation and message access.
//!
//! `authorize` never fails: storage or lookup errors become an `Error`
//! decision. Each call writes exactly one audit entry.

use super::{bounded, AuditLog, ParticipantResolver};
use crate::error::{
    AppError, AppResult, REASON_CONVERSATION_INACTIVE, REASON_CONVERSATION_NOT_FOUND,
    REASON_MESSAGE_NOT_FOUND, REASON_NOT_PARTICIPANT,
};
use crate::models::{AccessAuditEntry, AccessDecision, AccessTarget, Actor, Conversation, StoredMessage};
use crate::storage::ChatStore;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const REASON_CHECK_FAILED: &str = "authorization check failed";

#[derive(Debug, Clone)]
pub struct AccessOutcome {
    pub decision: AccessDecision,
    pub reason: Option<String>,
    pub conversation: Option<Conversation>,
    pub message: Option<StoredMessage>,
    pub participant_id: Option<Uuid>,
    failure: Option<AppError>,
}

impl AccessOutcome {
    pub fn granted(&self) -> bool {
        self.decision == AccessDecision::Granted
    }

    fn denied(reason: &str, conversation: Option<Conversation>) -> Self {
        Self {
            decision: AccessDecision::Denied,
            reason: Some(reason.to_string()),
            conversation,
            message: None,
            participant_id: None,
            failure: None,
        }
    }

    fn errored(err: AppError) -> Self {
        Self {
            decision: AccessDecision::Error,
            reason: Some(REASON_CHECK_FAILED.to_string()),
            conversation: None,
            message: None,
            participant_id: None,
            failure: Some(err),
        }
    }
}

/// Context carried out of a granted check.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub conversation: Conversation,
    pub message: Option<StoredMessage>,
    pub participant_id: Uuid,
}

#[derive(Clone)]
pub struct AccessController {
    store: Arc<dyn ChatStore>,
    resolver: ParticipantResolver,
    audit: AuditLog,
    timeout: Duration,
}

impl AccessController {
    pub fn new(
        store: Arc<dyn ChatStore>,
        resolver: ParticipantResolver,
        audit: AuditLog,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            audit,
            timeout,
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn resolver(&self) -> &ParticipantResolver {
        &self.resolver
    }

    pub async fn authorize(&self, actor: &Actor, target: AccessTarget) -> AccessOutcome {
        let outcome = match self.evaluate(actor, target).await {
            Ok(outcome) => outcome,
            Err(e) => AccessOutcome::errored(e),
        };

        let conversation_id = outcome.conversation.as_ref().map(|c| c.id);
        let entry = AccessAuditEntry::new(
            actor.user_id,
            actor.role,
            target,
            conversation_id,
            outcome.decision,
            match &outcome.failure {
                Some(e) => Some(format!("{REASON_CHECK_FAILED}: {e}")),
                None => outcome.reason.clone(),
            },
        );
        self.audit.record(entry).await;
        outcome
    }

    /// `authorize`, with denials turned into `AccessDenied(reason)` and check
    /// failures into the underlying error.
    pub async fn require(&self, actor: &Actor, target: AccessTarget) -> AppResult<Authorized> {
        let outcome = self.authorize(actor, target).await;
        match outcome.decision {
            AccessDecision::Granted => match (outcome.conversation, outcome.participant_id) {
                (Some(conversation), Some(participant_id)) => Ok(Authorized {
                    conversation,
                    message: outcome.message,
                    participant_id,
                }),
                _ => Err(AppError::Internal),
            },
            AccessDecision::Denied => Err(AppError::AccessDenied(
                outcome
                    .reason
                    .unwrap_or_else(|| REASON_NOT_PARTICIPANT.to_string()),
            )),
            AccessDecision::Error => Err(outcome.failure.unwrap_or(AppError::Internal)),
        }
    }

    async fn evaluate(&self, actor: &Actor, target: AccessTarget) -> AppResult<AccessOutcome> {
        let (conversation_id, message) = match target {
            AccessTarget::Conversation(id) => (id, None),
            AccessTarget::Message(id) => {
                match bounded(self.timeout, self.store.find_message(id)).await? {
                    // soft-deleted rows still resolve; callers decide what deleted means
                    Some(m) => (m.conversation_id, Some(m)),
                    None => return Ok(AccessOutcome::denied(REASON_MESSAGE_NOT_FOUND, None)),
                }
            }
        };

        let Some(conversation) =
            bounded(self.timeout, self.store.find_conversation(conversation_id)).await?
        else {
            return Ok(AccessOutcome::denied(REASON_CONVERSATION_NOT_FOUND, None));
        };
        if !conversation.is_active {
            return Ok(AccessOutcome::denied(
                REASON_CONVERSATION_INACTIVE,
                Some(conversation),
            ));
        }

        let Some(participant_id) = self.resolver.resolve_in(actor, &conversation).await? else {
            return Ok(AccessOutcome::denied(REASON_NOT_PARTICIPANT, Some(conversation)));
        };

        Ok(AccessOutcome {
            decision: AccessDecision::Granted,
            reason: None,
            conversation: Some(conversation),
            message,
            participant_id: Some(participant_id),
            failure: None,
        })
    }
}
