//! # Symmetric Crypto
//!
//! XChaCha20-Poly1305 AEAD sealing for frame payloads.
//!
//! Each sealed payload is `[nonce(24)] [ciphertext]`: a fresh random nonce is
//! generated per message and travels with the ciphertext inside the frame, so
//! the peer needs only the shared 32-byte session key to open it.

use crate::error::{RelayError, Result};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

/// Session keys are 256-bit.
pub const KEY_SIZE: usize = 32;

/// XChaCha20 extended nonces are 24 bytes.
pub const NONCE_SIZE: usize = 24;

/// AEAD cipher bound to one session key.
pub struct Crypto {
    cipher: XChaCha20Poly1305,
}

impl Crypto {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| RelayError::EncryptionFailure)?;

        let mut payload = nonce.to_vec();
        payload.extend(ciphertext);
        Ok(payload)
    }

    /// Decrypt a `nonce || ciphertext` payload produced by [`Crypto::seal`].
    ///
    /// Fails with `DecryptionFailure` on a wrong key, corrupted bytes, or a
    /// payload too short to carry a nonce.
    pub fn open(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() < NONCE_SIZE {
            return Err(RelayError::DecryptionFailure);
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| RelayError::DecryptionFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let crypto = Crypto::new(&[7u8; KEY_SIZE]);
        let payload = crypto.seal(b"hello relay").expect("seal");
        let plaintext = crypto.open(&payload).expect("open");
        assert_eq!(plaintext, b"hello relay");
    }

    #[test]
    fn nonces_are_unique_per_message() {
        let crypto = Crypto::new(&[7u8; KEY_SIZE]);
        let a = crypto.seal(b"same input").expect("seal");
        let b = crypto.seal(b"same input").expect("seal");
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_is_rejected() {
        let sender = Crypto::new(&[1u8; KEY_SIZE]);
        let receiver = Crypto::new(&[2u8; KEY_SIZE]);
        let payload = sender.seal(b"secret").expect("seal");
        assert!(matches!(
            receiver.open(&payload),
            Err(RelayError::DecryptionFailure)
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let crypto = Crypto::new(&[1u8; KEY_SIZE]);
        assert!(matches!(
            crypto.open(&[0u8; NONCE_SIZE - 1]),
            Err(RelayError::DecryptionFailure)
        ));
    }

    #[test]
    fn corrupted_ciphertext_is_rejected() {
        let crypto = Crypto::new(&[1u8; KEY_SIZE]);
        let mut payload = crypto.seal(b"secret").expect("seal");
        let last = payload.len() - 1;
        payload[last] ^= 0xFF;
        assert!(matches!(
            crypto.open(&payload),
            Err(RelayError::DecryptionFailure)
        ));
    }
}
