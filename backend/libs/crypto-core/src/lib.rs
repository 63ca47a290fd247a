//! Conversation-scoped encryption at rest.
//!
//! Every conversation gets its own AES-256-GCM key, stretched from a single
//! process-wide master secret. Message bodies are stored as a self-contained
//! hex envelope (`nonce:tag:ciphertext`) so the storage layer never sees
//! plaintext and never needs to know about key material.

pub mod cipher;
pub mod envelope;
pub mod hash;
pub mod keys;
pub mod secret;

pub use cipher::{CipherError, MessageCipher};
pub use envelope::Envelope;
pub use keys::{ConversationKey, KeyDerivationStore, DEFAULT_ITERATIONS, MIN_ITERATIONS};
pub use secret::{load_master_secret, MasterSecret, SecretError};
