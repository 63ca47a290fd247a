pub mod access_control;
pub mod audit_log;
pub mod content;
pub mod conversation_service;
pub mod participant_resolver;

pub use access_control::{AccessController, AccessOutcome, Authorized};
pub use audit_log::{spawn_audit_pruner, AuditLog, SuspiciousActivity};
pub use conversation_service::{ConversationService, MarkReadOutcome, SendMessage, SentMessage};
pub use participant_resolver::ParticipantResolver;

use crate::error::{AppError, AppResult};
use crate::storage::StorageResult;
use std::future::Future;
use std::time::Duration;

/// Run a storage call under a deadline, mapping both failure kinds into
/// `AppError`.
pub(crate) async fn bounded<F, T>(deadline: Duration, call: F) -> AppResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    resilience::with_timeout_into(deadline, async { call.await.map_err(AppError::from) }).await
}
