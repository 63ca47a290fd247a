/// Resilience helpers shared by the chat server and client
///
/// - **Backoff**: exponential delay schedule with a cap and an attempt ceiling
/// - **Retry**: re-run a fallible future following a backoff schedule
/// - **Timeout**: bound any collaborator call so nothing blocks forever
/// - **Presets**: tuned settings for reconnects and collaborator calls
///
/// # Example: collaborator call with timeout
///
/// ```rust,no_run
/// use resilience::{presets, with_timeout};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::collaborator_config();
///
///     let result = with_timeout(config.timeout.duration, async {
///         // profile lookup, notification insert, ...
///     })
///     .await;
///     assert!(result.is_ok());
/// }
/// ```

pub mod backoff;
pub mod presets;
pub mod retry;
pub mod timeout;

pub use backoff::BackoffPolicy;
pub use presets::{collaborator_config, reconnect_policy, ServiceConfig};
pub use retry::{with_retry, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_into, TimeoutConfig, TimeoutError};
