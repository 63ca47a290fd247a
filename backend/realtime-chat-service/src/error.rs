use crate::middleware::error_handling;
use crate::storage::StorageError;
use actix_web::{HttpResponse, ResponseError};
use crypto_core::CipherError;
use resilience::TimeoutError;
use thiserror::Error;

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub const REASON_NOT_PARTICIPANT: &str = "not a participant";
pub const REASON_CONVERSATION_NOT_FOUND: &str = "conversation not found";
pub const REASON_MESSAGE_NOT_FOUND: &str = "message not found";
pub const REASON_CONVERSATION_INACTIVE: &str = "conversation inactive";
pub const REASON_NOT_SENDER: &str = "not the message sender";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Access controller denial; carries the audited reason.
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("internal server error")]
    Internal,
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => AppError::NotFound(what),
            other => AppError::Storage(other.to_string()),
        }
    }
}

impl From<TimeoutError> for AppError {
    fn from(e: TimeoutError) -> Self {
        AppError::Timeout(e.to_string())
    }
}

impl From<CipherError> for AppError {
    fn from(e: CipherError) -> Self {
        AppError::Encryption(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl AppError {
    /// Whether a caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Timeout(_) | AppError::Storage(_) | AppError::Collaborator(_)
        )
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Unauthorized => 401,
            AppError::AccessDenied(reason)
                if reason == REASON_CONVERSATION_NOT_FOUND || reason == REASON_MESSAGE_NOT_FOUND =>
            {
                404
            }
            AppError::AccessDenied(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Collaborator(_) => 502,
            AppError::Timeout(_) => 504,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Storage(_)
            | AppError::Encryption(_)
            | AppError::Internal => 500,
        }
    }

    /// Reason string suitable for a client-facing event.
    pub fn client_reason(&self) -> String {
        match self {
            AppError::AccessDenied(reason) | AppError::Validation(reason) => reason.clone(),
            AppError::NotFound(what) => what.clone(),
            AppError::Unauthorized => "unauthorized".to_string(),
            AppError::Timeout(_) => "request timed out".to_string(),
            _ => "internal error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_targets_map_to_404() {
        assert_eq!(
            AppError::AccessDenied(REASON_CONVERSATION_NOT_FOUND.into()).status_code(),
            404
        );
        assert_eq!(
            AppError::AccessDenied(REASON_NOT_PARTICIPANT.into()).status_code(),
            403
        );
    }

    #[test]
    fn unique_violation_is_a_storage_error() {
        let err: AppError = StorageError::UniqueViolation("conversations_active_pair".into()).into();
        assert!(matches!(err, AppError::Storage(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn client_reason_hides_internals() {
        assert_eq!(
            AppError::Storage("connection reset by 10.0.0.3".into()).client_reason(),
            "internal error"
        );
        assert_eq!(
            AppError::AccessDenied(REASON_NOT_PARTICIPANT.into()).client_reason(),
            REASON_NOT_PARTICIPANT
        );
    }
}
