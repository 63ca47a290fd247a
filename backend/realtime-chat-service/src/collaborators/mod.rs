//! External services the chat core calls but does not own.
//!
//! Profiles, file storage, notifications and reminders are reached only
//! through these traits. The bundled implementations are process-local and
//! good enough for development, tests and single-node deployments.

pub mod files;
pub mod notifications;
pub mod profiles;
pub mod reminders;

pub use files::{FileStorage, InMemoryFileStorage};
pub use notifications::{
    InMemoryNotificationSink, LogNotificationSink, NotificationRecord, NotificationSink,
};
pub use profiles::{ProfileDirectory, StaticProfileDirectory};
pub use reminders::{ReminderScheduler, TokioReminderScheduler, UnreadReminder};

use crate::error::AppError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<CollaboratorError> for AppError {
    fn from(e: CollaboratorError) -> Self {
        AppError::Collaborator(e.to_string())
    }
}

/// Bundle handed to the service layer at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub profiles: Arc<dyn ProfileDirectory>,
    pub files: Arc<dyn FileStorage>,
    pub notifications: Arc<dyn NotificationSink>,
    pub reminders: Arc<dyn ReminderScheduler>,
}

impl Collaborators {
    /// Everything in-process: static profiles, memory file storage, log
    /// notifications and tokio-timer reminders.
    pub fn process_local(store: Arc<dyn crate::storage::ChatStore>) -> Self {
        let notifications: Arc<dyn NotificationSink> = Arc::new(LogNotificationSink);
        Self {
            profiles: Arc::new(StaticProfileDirectory::new()),
            files: Arc::new(InMemoryFileStorage::new()),
            reminders: Arc::new(TokioReminderScheduler::new(store, notifications.clone())),
            notifications,
        }
    }
}
