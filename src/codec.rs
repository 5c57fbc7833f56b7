//! Secure datagram codec
//!
//! A datagram is `nonce (24 bytes) ‖ ciphertext`, where the ciphertext is a
//! XSalsa20-Poly1305 secretbox over the JSON plaintext. Decryption fails closed:
//! a flipped bit or a wrong key never yields plaintext.
//!
//! There is no nonce history. Replays inside the freshness window are accepted
//! and are harmless because every sample is applied idempotently.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use crypto_secretbox::{
    Key, Nonce, XSalsa20Poly1305,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};

use crate::error::{IngestError, IngestResult};

/// Size of the shared key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the XSalsa20 nonce prefix in bytes
pub const NONCE_SIZE: usize = 24;

/// Error raised when the shared key cannot be loaded
#[derive(Debug)]
pub enum KeyError {
    /// Key is not valid base64
    InvalidEncoding(base64::DecodeError),

    /// Key decoded to the wrong number of bytes
    InvalidLength(usize),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::InvalidEncoding(err) => write!(f, "shared key is not valid base64: {err}"),
            KeyError::InvalidLength(len) => write!(
                f,
                "shared key must be {KEY_SIZE} bytes (256 bits), got {len} bytes"
            ),
        }
    }
}

impl std::error::Error for KeyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KeyError::InvalidEncoding(err) => Some(err),
            KeyError::InvalidLength(_) => None,
        }
    }
}

/// Error raised when a datagram cannot be encrypted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealError;

impl fmt::Display for SealError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to encrypt datagram")
    }
}

impl std::error::Error for SealError {}

/// Pre-shared symmetric key used by every sender
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a key stored at rest as base64
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(KeyError::InvalidEncoding)?;

        let bytes: [u8; KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;

        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    fn cipher(&self) -> XSalsa20Poly1305 {
        XSalsa20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Decrypt and authenticate a datagram
pub fn open(packet: &[u8], key: &SharedKey) -> IngestResult<Vec<u8>> {
    if packet.len() < NONCE_SIZE {
        return Err(IngestError::TransportTooShort { len: packet.len() });
    }

    let (nonce, ciphertext) = packet.split_at(NONCE_SIZE);

    key.cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| IngestError::DecryptionFailed)
}

/// Encrypt `plaintext` under an explicit nonce and frame it for the wire
///
/// The caller must never reuse a nonce with the same key.
pub fn seal(
    plaintext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    key: &SharedKey,
) -> Result<Vec<u8>, SealError> {
    let nonce = Nonce::from_slice(nonce);
    let ciphertext = key
        .cipher()
        .encrypt(nonce, plaintext)
        .map_err(|_| SealError)?;

    let mut packet = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    packet.extend_from_slice(nonce);
    packet.extend_from_slice(&ciphertext);
    Ok(packet)
}

/// Encrypt `plaintext` under a fresh random nonce
pub fn seal_random(plaintext: &[u8], key: &SharedKey) -> Result<Vec<u8>, SealError> {
    let nonce = XSalsa20Poly1305::generate_nonce(&mut OsRng);
    let mut bytes = [0u8; NONCE_SIZE];
    bytes.copy_from_slice(&nonce);
    seal(plaintext, &bytes, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn zero_key() -> SharedKey {
        SharedKey::new([0u8; KEY_SIZE])
    }

    #[test]
    fn test_round_trip() {
        let key = zero_key();
        let packet = seal(b"{\"name\":\"X\"}", &[7u8; NONCE_SIZE], &key).unwrap();

        assert_eq!(&packet[..NONCE_SIZE], &[7u8; NONCE_SIZE]);
        assert_eq!(open(&packet, &key).unwrap(), b"{\"name\":\"X\"}");
    }

    #[test]
    fn test_random_nonces_differ() {
        let key = zero_key();
        let a = seal_random(b"payload", &key).unwrap();
        let b = seal_random(b"payload", &key).unwrap();

        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_eq!(open(&a, &key).unwrap(), b"payload");
        assert_eq!(open(&b, &key).unwrap(), b"payload");
    }

    #[test]
    fn test_seal_empty_plaintext_is_tag_only() {
        let key = zero_key();
        let packet = seal(b"", &[2u8; NONCE_SIZE], &key).unwrap();

        assert_eq!(packet.len(), NONCE_SIZE + 16);
        assert_eq!(open(&packet, &key).unwrap(), b"");
    }

    #[test]
    fn test_seal_error_message() {
        let err: Box<dyn std::error::Error> = Box::new(SealError);
        assert_eq!(err.to_string(), "failed to encrypt datagram");
    }

    #[test]
    fn test_short_packet_rejected() {
        let result = open(&[0u8; NONCE_SIZE - 1], &zero_key());
        assert_matches!(result, Err(IngestError::TransportTooShort { len: 23 }));
    }

    #[test]
    fn test_nonce_only_packet_fails_decryption() {
        let result = open(&[0u8; NONCE_SIZE], &zero_key());
        assert_matches!(result, Err(IngestError::DecryptionFailed));
    }

    #[test]
    fn test_wrong_key_fails() {
        let packet = seal(b"hello", &[1u8; NONCE_SIZE], &zero_key()).unwrap();
        let other = SharedKey::new([9u8; KEY_SIZE]);

        assert_matches!(open(&packet, &other), Err(IngestError::DecryptionFailed));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = zero_key();
        let mut packet = seal(b"hello", &[1u8; NONCE_SIZE], &key).unwrap();
        let last = packet.len() - 1;
        packet[last] ^= 0x01;

        assert_matches!(open(&packet, &key), Err(IngestError::DecryptionFailed));
    }

    #[test]
    fn test_key_from_base64() {
        let key = SharedKey::from_base64(&BASE64.encode([3u8; KEY_SIZE])).unwrap();
        assert_eq!(key, SharedKey::new([3u8; KEY_SIZE]));
        assert_eq!(SharedKey::from_base64(&key.to_base64()).unwrap(), key);
    }

    #[test]
    fn test_key_wrong_length() {
        let result = SharedKey::from_base64(&BASE64.encode([3u8; 16]));
        assert_matches!(result, Err(KeyError::InvalidLength(16)));
    }

    #[test]
    fn test_key_bad_encoding() {
        assert_matches!(
            SharedKey::from_base64("not base64!!"),
            Err(KeyError::InvalidEncoding(_))
        );
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = SharedKey::new([0xAB; KEY_SIZE]);
        assert_eq!(format!("{key:?}"), "SharedKey(..)");
    }
}
