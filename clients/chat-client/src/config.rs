use resilience::{reconnect_policy, BackoffPolicy};
use std::path::PathBuf;
use std::time::Duration;

/// Settings for one [`ConnectionSession`](crate::ConnectionSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `ws://` or `wss://` URL of the gateway endpoint.
    pub server_url: String,
    /// Bearer token sent in the `authenticate` handshake.
    pub token: String,
    /// Names the persisted sync-state and outbound-queue blobs.
    pub installation_id: String,
    pub backoff: BackoffPolicy,
    pub ack_timeout: Duration,
    /// Flush attempts a queued message gets before it is dropped.
    pub max_queue_retries: u32,
    /// Where the offline store keeps its files. `None` keeps state in memory.
    pub state_dir: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(
        server_url: impl Into<String>,
        token: impl Into<String>,
        installation_id: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            token: token.into(),
            installation_id: installation_id.into(),
            backoff: reconnect_policy(),
            ack_timeout: Duration::from_secs(10),
            max_queue_retries: 3,
            state_dir: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_reconnect_preset() {
        let config = SessionConfig::new("ws://localhost:3000/ws", "token", "phone-1");
        assert_eq!(config.backoff.base, Duration::from_secs(1));
        assert_eq!(config.backoff.factor, 2.0);
        assert_eq!(config.backoff.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff.max_attempts, 10);
        assert_eq!(config.ack_timeout, Duration::from_secs(10));
        assert_eq!(config.max_queue_retries, 3);
        assert!(config.state_dir.is_none());
    }
}
