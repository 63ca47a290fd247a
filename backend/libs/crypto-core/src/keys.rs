//! Per-conversation key derivation and caching.

use crate::hash::scope_salt;
use crate::secret::MasterSecret;
use chrono::Utc;
use dashmap::DashMap;
use sha2::Sha256;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a derived conversation key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// PBKDF2 rounds used in production.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Lowest round count a deployment may configure.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Symmetric key bound to a single conversation.
///
/// Lives only in process memory and is wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ConversationKey {
    bytes: [u8; KEY_LEN],
    version: u32,
}

impl ConversationKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// 0 for the originally derived key, incremented on every rotation.
    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationKey")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Derives one key per conversation from the master secret and caches it.
///
/// Derivation is deliberately slow (PBKDF2-HMAC-SHA256), so the cache turns
/// every lookup after the first into a map read. The cache is a sharded
/// concurrent map; many connection handlers hit it at once.
///
/// Rotation only changes the key used from now on. Envelopes written under
/// an older key are not re-encrypted and stop decrypting once the old key
/// is gone.
pub struct KeyDerivationStore {
    master: MasterSecret,
    iterations: u32,
    cache: DashMap<String, Arc<ConversationKey>>,
    derivations: AtomicU64,
}

impl KeyDerivationStore {
    pub fn new(master: MasterSecret) -> Self {
        Self::with_iterations(master, DEFAULT_ITERATIONS)
    }

    /// Build a store with a custom round count.
    ///
    /// Production configuration never goes below [`MIN_ITERATIONS`]; lower
    /// counts exist so unit tests stay fast.
    pub fn with_iterations(master: MasterSecret, iterations: u32) -> Self {
        Self {
            master,
            iterations: iterations.max(1),
            cache: DashMap::new(),
            derivations: AtomicU64::new(0),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Current key for `conversation_id`, deriving it on first use.
    pub fn get_key(&self, conversation_id: &str) -> Arc<ConversationKey> {
        if let Some(key) = self.cache.get(conversation_id) {
            return Arc::clone(key.value());
        }

        // Derive outside the shard lock; concurrent first callers converge on
        // whichever insert lands first.
        let derived = Arc::new(self.derive(conversation_id, 0));
        let entry = self
            .cache
            .entry(conversation_id.to_string())
            .or_insert(derived);
        Arc::clone(entry.value())
    }

    /// Replace the current key with one derived from `id + rotation time`.
    ///
    /// Returns the new key. History is left untouched.
    pub fn rotate_key(&self, conversation_id: &str) -> Arc<ConversationKey> {
        let next_version = self
            .cache
            .get(conversation_id)
            .map(|k| k.version() + 1)
            .unwrap_or(1);
        let rotated_at = Utc::now().timestamp_millis();
        let input = format!("{conversation_id}:{next_version}:{rotated_at}");

        let key = Arc::new(self.derive(&input, next_version));
        self.cache
            .insert(conversation_id.to_string(), Arc::clone(&key));

        tracing::info!(
            conversation_id = %conversation_id,
            version = next_version,
            "conversation key rotated; envelopes under older keys no longer decrypt"
        );
        key
    }

    /// Drop the cached key so the next lookup derives it again.
    pub fn evict(&self, conversation_id: &str) -> bool {
        self.cache.remove(conversation_id).is_some()
    }

    pub fn cached_keys(&self) -> usize {
        self.cache.len()
    }

    /// Number of expensive derivations performed so far.
    pub fn derivation_count(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }

    fn derive(&self, input: &str, version: u32) -> ConversationKey {
        let salt = scope_salt(input);
        let mut bytes = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.master.as_bytes(), &salt, self.iterations, &mut bytes);
        self.derivations.fetch_add(1, Ordering::Relaxed);
        ConversationKey { bytes, version }
    }
}

impl fmt::Debug for KeyDerivationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDerivationStore")
            .field("iterations", &self.iterations)
            .field("cached_keys", &self.cache.len())
            .finish_non_exhaustive()
    }
}
