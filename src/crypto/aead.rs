//! Authenticated encryption (AES-256-GCM)
//!
//! Output layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;

use super::CryptoError;
use super::random::fill_random;

/// Required key length in bytes
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes, prepended to every ciphertext
pub const NONCE_LEN: usize = 12;

/// Symmetric AEAD keyed once at construction
#[derive(Clone)]
pub struct CryptoService {
    cipher: Aes256Gcm,
}

impl fmt::Debug for CryptoService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoService").finish_non_exhaustive()
    }
}

impl CryptoService {
    /// Build a service from a 32-byte key
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Build a service from a hex-encoded 32-byte key
    pub fn from_hex(key: &str) -> Result<Self, CryptoError> {
        Self::new(&hex::decode(key.trim())?)
    }

    /// Encrypt under a fresh random nonce
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plain.is_empty() {
            return Err(CryptoError::EmptyInput);
        }
        let mut nonce = [0u8; NONCE_LEN];
        fill_random(&mut nonce)?;
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plain)
            .map_err(|_| CryptoError::Seal)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Split off the nonce and open the remainder
    pub fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if cipher.is_empty() {
            return Err(CryptoError::EmptyInput);
        }
        if cipher.len() < NONCE_LEN {
            return Err(CryptoError::CiphertextTooShort);
        }
        let (nonce, body) = cipher.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::Open)
    }

    /// [`Self::encrypt`] with unpadded base64 output
    pub fn encrypt_base64(&self, plain: &[u8]) -> Result<String, CryptoError> {
        Ok(STANDARD_NO_PAD.encode(self.encrypt(plain)?))
    }

    /// [`Self::decrypt`] of unpadded base64 input
    pub fn decrypt_base64(&self, cipher: &str) -> Result<Vec<u8>, CryptoError> {
        if cipher.is_empty() {
            return Err(CryptoError::EmptyInput);
        }
        self.decrypt(&STANDARD_NO_PAD.decode(cipher)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CryptoService {
        CryptoService::new(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn round_trip_restores_plaintext() {
        let svc = service();
        let sealed = svc.encrypt(b"signing key material").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + b"signing key material".len() + 16);
        assert_eq!(svc.decrypt(&sealed).unwrap(), b"signing key material");
    }

    #[test]
    fn each_encryption_uses_fresh_nonce() {
        let svc = service();
        let a = svc.encrypt(b"same").unwrap();
        let b = svc.encrypt(b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_input_is_rejected() {
        let svc = service();
        assert!(matches!(svc.encrypt(b""), Err(CryptoError::EmptyInput)));
        assert!(matches!(svc.decrypt(b""), Err(CryptoError::EmptyInput)));
        assert!(matches!(svc.decrypt_base64(""), Err(CryptoError::EmptyInput)));
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let svc = service();
        assert!(matches!(
            svc.decrypt(&[1, 2, 3]),
            Err(CryptoError::CiphertextTooShort)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        // GIVEN: a sealed message with one ciphertext bit flipped
        let svc = service();
        let mut sealed = svc.encrypt(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        // WHEN / THEN: opening fails on the tag check
        assert!(matches!(svc.decrypt(&sealed), Err(CryptoError::Open)));
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = service().encrypt(b"payload").unwrap();
        let other = CryptoService::new(&[8u8; KEY_LEN]).unwrap();
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn invalid_key_length_is_rejected() {
        assert!(matches!(
            CryptoService::new(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn base64_round_trip() {
        let svc = service();
        let encoded = svc.encrypt_base64(b"hello").unwrap();
        assert!(!encoded.ends_with('='));
        assert_eq!(svc.decrypt_base64(&encoded).unwrap(), b"hello");
    }
}
