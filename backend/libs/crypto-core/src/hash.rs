use sha2::{Digest, Sha256};

/// Compute SHA256 hash of input bytes
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Deterministic per-scope salt used for key stretching.
///
/// The salt is a one-way function of the scope identifier, so two processes
/// sharing a master secret always derive the same key for the same scope.
pub fn scope_salt(scope: &str) -> [u8; 32] {
    sha256(scope.as_bytes())
}
