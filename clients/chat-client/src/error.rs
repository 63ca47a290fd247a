use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("no acknowledgement within {0:?}")]
    Timeout(std::time::Duration),

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("offline store error: {0}")]
    Storage(String),

    #[error("gave up after {attempts} reconnect attempts")]
    Terminal { attempts: u32 },

    #[error("authentication failed: {0}")]
    Unauthorized(String),
}

impl ClientError {
    /// Failures a later reconnect could fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Timeout(_))
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Storage(e.to_string())
    }
}

impl From<event_schema::ProtocolError> for ClientError {
    fn from(e: event_schema::ProtocolError) -> Self {
        ClientError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
