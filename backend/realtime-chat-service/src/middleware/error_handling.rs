use crate::error::{
    AppError, REASON_CONVERSATION_INACTIVE, REASON_CONVERSATION_NOT_FOUND,
    REASON_MESSAGE_NOT_FOUND, REASON_NOT_SENDER,
};
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_codes, error_types as kinds, status_phrase, ErrorResponse};

// Map domain errors to HTTP responses
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::Validation(reason) if reason.contains("role") => {
            (kinds::VALIDATION_ERROR, error_codes::ROLE_INVALID)
        }
        AppError::Validation(_) => (kinds::VALIDATION_ERROR, error_codes::CONTENT_INVALID),
        AppError::Unauthorized => (kinds::AUTHENTICATION_ERROR, error_codes::TOKEN_INVALID),
        AppError::AccessDenied(reason) => match reason.as_str() {
            REASON_CONVERSATION_NOT_FOUND => {
                (kinds::NOT_FOUND_ERROR, error_codes::CONVERSATION_NOT_FOUND)
            }
            REASON_MESSAGE_NOT_FOUND => (kinds::NOT_FOUND_ERROR, error_codes::MESSAGE_NOT_FOUND),
            REASON_CONVERSATION_INACTIVE => {
                (kinds::AUTHORIZATION_ERROR, error_codes::CONVERSATION_INACTIVE)
            }
            REASON_NOT_SENDER => (kinds::AUTHORIZATION_ERROR, error_codes::NOT_MESSAGE_SENDER),
            _ => (
                kinds::AUTHORIZATION_ERROR,
                error_codes::NOT_CONVERSATION_PARTICIPANT,
            ),
        },
        AppError::NotFound(what) if what.contains("message") => {
            (kinds::NOT_FOUND_ERROR, error_codes::MESSAGE_NOT_FOUND)
        }
        AppError::NotFound(_) => (kinds::NOT_FOUND_ERROR, error_codes::CONVERSATION_NOT_FOUND),
        AppError::Storage(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::Encryption(_) => (kinds::SERVER_ERROR, error_codes::ENCRYPTION_ERROR),
        AppError::Timeout(_) => (kinds::SERVICE_UNAVAILABLE_ERROR, error_codes::UPSTREAM_TIMEOUT),
        AppError::Collaborator(_) => (kinds::SERVICE_UNAVAILABLE_ERROR, error_codes::UPSTREAM_ERROR),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
            (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR)
        }
    };

    let response = ErrorResponse::new(
        status_phrase(status.as_u16()),
        &err.client_reason(),
        status.as_u16(),
        error_type,
        code,
    );

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    if status.is_server_error() {
        tracing::error!(error = %err, code = %response.code, "request failed");
    }
    HttpResponse::build(status).json(response)
}
