//! Wedlink messaging core.
//!
//! Facade over the workspace members so integration tests and tooling can
//! reach the server services and the client session through one crate.

pub use chat_client as client;
pub use crypto_core as crypto;
pub use event_schema as protocol;
pub use realtime_chat_service as server;
