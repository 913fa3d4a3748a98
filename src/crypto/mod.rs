//! Crypto primitives shared by the token subsystem and the CLI.
//!
//! - [`crypto_cmp_bytes`] / [`crypto_cmp_str`]: constant-time equality that
//!   also hides input length
//! - [`random_bytes`] / [`random_string`]: platform CSPRNG with bounded retry
//! - [`CryptoService`]: AES-256-GCM with the nonce prepended to the output
//! - [`hash_password`] / [`verify_password`]: SHA-512 pre-hash into Argon2i

mod aead;
mod compare;
mod password;
mod random;

pub use aead::{CryptoService, KEY_LEN, NONCE_LEN};
pub use compare::{crypto_cmp_bytes, crypto_cmp_str};
pub use password::{PasswordCredential, hash_password, verify_password};
pub use random::{RANDOM_RETRY_LIMIT, generate_key, random_bytes, random_string};

use thiserror::Error;

/// Errors raised by the crypto primitives
#[derive(Error, Debug)]
pub enum CryptoError {
    /// CSPRNG failed on every attempt
    #[error("secure random source unavailable after {attempts} attempts: {reason}")]
    RandomUnavailable {
        /// Attempts made before giving up
        attempts: u32,
        /// Last error reported by the platform
        reason: String,
    },

    /// AEAD key has the wrong length
    #[error("invalid key length {0}, want {KEY_LEN}")]
    InvalidKeyLength(usize),

    /// Empty plaintext or ciphertext
    #[error("empty input")]
    EmptyInput,

    /// Ciphertext shorter than the nonce
    #[error("ciphertext too short")]
    CiphertextTooShort,

    /// Sealing failed
    #[error("encryption failed")]
    Seal,

    /// Authentication tag mismatch or corrupted ciphertext
    #[error("decryption failed")]
    Open,

    /// Base64 decoding failed
    #[error("base64 decode: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Hex decoding failed
    #[error("hex decode: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Key derivation failed
    #[error("key derivation: {0}")]
    Kdf(String),
}
