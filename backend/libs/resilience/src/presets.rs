/// Preset configurations for the chat stack
use crate::backoff::BackoffPolicy;
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Configuration bundle for a collaborator type
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: TimeoutConfig,
    pub retry: Option<RetryConfig>,
}

/// Storage, profile lookup and notification collaborators
///
/// - Timeout: 5s
/// - Retry: 2 attempts, only used for best-effort side effects
pub fn collaborator_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(5),
        },
        retry: Some(RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }),
    }
}

/// Client reconnects: 1s, 2s, 4s ... capped at 30s, 10 attempts
pub fn reconnect_policy() -> BackoffPolicy {
    BackoffPolicy::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_policy_is_bounded() {
        let policy = reconnect_policy();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for_attempt(10), Some(Duration::from_secs(30)));
        assert!(policy.delay_for_attempt(11).is_none());
    }

    #[test]
    fn collaborator_calls_have_a_timeout() {
        let config = collaborator_config();
        assert_eq!(config.timeout.duration, Duration::from_secs(5));
        assert!(config.retry.is_some());
    }
}
