//! Master secret loading.
//!
//! The master secret is a 32-byte value supplied as 64 hex characters. It is
//! read once at process start. Production refuses to start without a valid
//! secret; every other environment falls back to a freshly generated one so
//! local development works out of the box (at the cost of losing access to
//! anything encrypted by a previous run).

use rand::{rngs::OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the hex-encoded master secret.
pub const MASTER_SECRET_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    #[error("master secret missing")]
    Missing,

    #[error("master secret must be {MASTER_SECRET_HEX_LEN} hex characters, got {0}")]
    InvalidLength(usize),

    #[error("master secret is not valid hex: {0}")]
    InvalidHex(String),
}

/// Process-wide secret that all conversation keys are stretched from.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret([u8; 32]);

impl MasterSecret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> Result<Self, SecretError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(SecretError::Missing);
        }
        if value.len() != MASTER_SECRET_HEX_LEN {
            return Err(SecretError::InvalidLength(value.len()));
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(value, &mut bytes)
            .map_err(|e| SecretError::InvalidHex(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Generate an ephemeral secret from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(<redacted>)")
    }
}

/// Resolve the master secret from its configured value.
///
/// `production == true` turns any problem into a hard error. Otherwise a
/// missing or malformed value is replaced by an ephemeral secret.
pub fn load_master_secret(
    value: Option<&str>,
    production: bool,
) -> Result<MasterSecret, SecretError> {
    let parsed = match value {
        Some(raw) => MasterSecret::from_hex(raw),
        None => Err(SecretError::Missing),
    };

    match parsed {
        Ok(secret) => Ok(secret),
        Err(e) if production => Err(e),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "!!! MASTER SECRET UNAVAILABLE - generated an EPHEMERAL secret. \
                 Messages encrypted by this process become unreadable after restart. \
                 Never run like this in production !!!"
            );
            Ok(MasterSecret::generate())
        }
    }
}
