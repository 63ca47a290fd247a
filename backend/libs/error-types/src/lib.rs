use serde::{Deserialize, Serialize};

/// Unified JSON error body returned by every HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short status phrase ("Bad Request", "Forbidden", ...)
    pub error: String,

    /// Human readable explanation
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Coarse category clients route on, see [`error_types`]
    pub error_type: String,

    /// Stable machine code, see [`error_codes`]
    pub code: String,

    /// Extra detail, e.g. the access denial reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Request correlation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// ISO 8601
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

/// Status phrase for the codes the chat service emits.
pub fn status_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

pub mod error_codes {
    // Authentication
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_MISSING: &str = "TOKEN_MISSING";

    // Access control
    pub const NOT_CONVERSATION_PARTICIPANT: &str = "NOT_CONVERSATION_PARTICIPANT";
    pub const CONVERSATION_INACTIVE: &str = "CONVERSATION_INACTIVE";
    pub const NOT_MESSAGE_SENDER: &str = "NOT_MESSAGE_SENDER";

    // Conversations and messages
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const CONTENT_INVALID: &str = "CONTENT_INVALID";
    pub const ROLE_INVALID: &str = "ROLE_INVALID";

    // System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const ENCRYPTION_ERROR: &str = "ENCRYPTION_ERROR";
    pub const UPSTREAM_TIMEOUT: &str = "UPSTREAM_TIMEOUT";
    pub const UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const CONFLICT_ERROR: &str = "conflict_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVICE_UNAVAILABLE_ERROR: &str = "service_unavailable_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_creation() {
        let error = ErrorResponse::new(
            "Forbidden",
            "access denied: not a participant",
            403,
            error_types::AUTHORIZATION_ERROR,
            error_codes::NOT_CONVERSATION_PARTICIPANT,
        );

        assert_eq!(error.status, 403);
        assert_eq!(error.error_type, error_types::AUTHORIZATION_ERROR);
        assert_eq!(error.code, error_codes::NOT_CONVERSATION_PARTICIPANT);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let error = ErrorResponse::new(
            "Bad Request",
            "content must not be empty",
            400,
            error_types::VALIDATION_ERROR,
            error_codes::CONTENT_INVALID,
        );
        let json = serde_json::to_value(&error).unwrap();
        assert!(json.get("details").is_none());
        assert!(json.get("trace_id").is_none());

        let json = serde_json::to_value(error.with_details("empty".into())).unwrap();
        assert_eq!(json["details"], "empty");
    }

    #[test]
    fn test_status_phrase() {
        assert_eq!(status_phrase(404), "Not Found");
        assert_eq!(status_phrase(418), "Error");
    }
}
