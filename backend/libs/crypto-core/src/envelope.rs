//! Wire format for encrypted message bodies: `<nonce>:<tag>:<ciphertext>`,
//! each part lowercase hex.

use crate::cipher::CipherError;
use std::fmt;
use std::str::FromStr;

/// Nonce length in bytes (128-bit).
pub const NONCE_LEN: usize = 16;

/// Authentication tag length in bytes (128-bit).
pub const TAG_LEN: usize = 16;

const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    pub fn encode(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            hex::encode(self.nonce),
            hex::encode(self.tag),
            hex::encode(&self.ciphertext)
        )
    }

    /// Parse an envelope. Anything other than exactly three hex fields of the
    /// right sizes is a format error.
    pub fn parse(raw: &str) -> Result<Self, CipherError> {
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        if parts.len() != 3 {
            return Err(CipherError::MalformedEnvelope(format!(
                "expected 3 fields, found {}",
                parts.len()
            )));
        }

        let nonce = decode_fixed::<NONCE_LEN>(parts[0], "nonce")?;
        let tag = decode_fixed::<TAG_LEN>(parts[1], "tag")?;
        let ciphertext = hex::decode(parts[2])
            .map_err(|e| CipherError::MalformedEnvelope(format!("ciphertext: {e}")))?;

        Ok(Self {
            nonce,
            tag,
            ciphertext,
        })
    }
}

fn decode_fixed<const N: usize>(field: &str, name: &str) -> Result<[u8; N], CipherError> {
    let mut out = [0u8; N];
    if field.len() != N * 2 {
        return Err(CipherError::MalformedEnvelope(format!(
            "{name}: expected {} hex chars, found {}",
            N * 2,
            field.len()
        )));
    }
    hex::decode_to_slice(field, &mut out)
        .map_err(|e| CipherError::MalformedEnvelope(format!("{name}: {e}")))?;
    Ok(out)
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Envelope {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            nonce: [0xab; NONCE_LEN],
            tag: [0xcd; TAG_LEN],
            ciphertext: vec![1, 2, 3],
        }
    }

    #[test]
    fn encodes_three_hex_fields() {
        let encoded = sample().encode();
        let parts: Vec<&str> = encoded.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ab".repeat(NONCE_LEN));
        assert_eq!(parts[1], "cd".repeat(TAG_LEN));
        assert_eq!(parts[2], "010203");
        assert_eq!(Envelope::parse(&encoded).unwrap(), sample());
    }

    #[test]
    fn empty_ciphertext_is_a_valid_envelope() {
        let env = Envelope {
            ciphertext: Vec::new(),
            ..sample()
        };
        let encoded = env.encode();
        assert!(encoded.ends_with(':'));
        assert_eq!(Envelope::parse(&encoded).unwrap(), env);
    }

    #[test]
    fn rejects_wrong_field_count() {
        for raw in ["", "abc", "a:b", "a:b:c:d"] {
            assert!(
                matches!(Envelope::parse(raw), Err(CipherError::MalformedEnvelope(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn rejects_short_nonce_and_non_hex() {
        let short = format!("abcd:{}:00", "cd".repeat(TAG_LEN));
        assert!(Envelope::parse(&short).is_err());

        let non_hex = format!("{}:{}:zz", "ab".repeat(NONCE_LEN), "cd".repeat(TAG_LEN));
        assert!(Envelope::parse(&non_hex).is_err());
    }
}
