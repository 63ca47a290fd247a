//! Authenticated encryption of message bodies.
//!
//! AES-256-GCM with a 128-bit random nonce and 128-bit tag. Output is an
//! [`Envelope`] string; see `envelope.rs` for the format.

use crate::envelope::{Envelope, NONCE_LEN, TAG_LEN};
use crate::keys::KeyDerivationStore;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;

/// AES-256-GCM parameterised with a 16-byte nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("invalid key length")]
    InvalidKey,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decrypted content is not valid UTF-8")]
    InvalidUtf8,
}

/// Encrypts and decrypts message content under per-conversation keys.
#[derive(Debug, Clone)]
pub struct MessageCipher {
    keys: Arc<KeyDerivationStore>,
}

impl MessageCipher {
    pub fn new(keys: Arc<KeyDerivationStore>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Arc<KeyDerivationStore> {
        &self.keys
    }

    /// Encrypt `plaintext` for `conversation_id`. Every call draws a fresh
    /// nonce, so equal plaintexts produce different envelopes.
    pub fn encrypt(&self, plaintext: &str, conversation_id: &str) -> Result<String, CipherError> {
        let key = self.keys.get_key(conversation_id);
        let cipher =
            Aes256Gcm16::new_from_slice(key.as_bytes()).map_err(|_| CipherError::InvalidKey)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut buffer)
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());

        Ok(Envelope {
            nonce,
            tag: tag_bytes,
            ciphertext: buffer,
        }
        .encode())
    }

    /// Decrypt an envelope produced by [`MessageCipher::encrypt`] for the
    /// same conversation.
    pub fn decrypt(&self, envelope: &str, conversation_id: &str) -> Result<String, CipherError> {
        let parsed = Envelope::parse(envelope)?;
        let key = self.keys.get_key(conversation_id);
        let cipher =
            Aes256Gcm16::new_from_slice(key.as_bytes()).map_err(|_| CipherError::InvalidKey)?;

        let mut buffer = parsed.ciphertext;
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&parsed.nonce),
                b"",
                &mut buffer,
                GenericArray::from_slice(&parsed.tag),
            )
            .map_err(|_| CipherError::AuthenticationFailed)?;

        String::from_utf8(buffer).map_err(|_| CipherError::InvalidUtf8)
    }
}
