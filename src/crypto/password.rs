//! Salted, memory-hard password hashing
//!
//! The password is first reduced with SHA-512 so arbitrarily long input
//! costs the same, then derived with Argon2i (t=4, m=8 MiB, p=4) into a
//! 32-byte hash.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use super::CryptoError;
use super::compare::crypto_cmp_bytes;
use super::random::random_bytes;

const TIME_COST: u32 = 4;
const MEMORY_COST_KIB: u32 = 8 * 1024;
const PARALLELISM: u32 = 4;
const HASH_LEN: usize = 32;
const SALT_LEN: usize = 32;

/// Stored password hash and salt, both hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordCredential {
    /// Derived hash
    pub hash: String,
    /// Random salt
    pub salt: String,
}

fn derive(password: &str, salt: &[u8]) -> Result<[u8; HASH_LEN], CryptoError> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, Some(HASH_LEN))
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2i, Version::V0x13, params);

    let prehash = Sha512::digest(password.as_bytes());
    let mut out = [0u8; HASH_LEN];
    argon
        .hash_password_into(prehash.as_slice(), salt, &mut out)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(out)
}

/// Hash a password under a fresh random salt
pub fn hash_password(password: &str) -> Result<PasswordCredential, CryptoError> {
    let salt = random_bytes(SALT_LEN)?;
    let hash = derive(password, &salt)?;
    Ok(PasswordCredential {
        hash: hex::encode(hash),
        salt: hex::encode(salt),
    })
}

/// Check `password` against a stored hash and salt.
///
/// An undecodable hash never matches. An undecodable salt is an error.
pub fn verify_password(hash: &str, salt: &str, password: &str) -> Result<bool, CryptoError> {
    let Ok(expected) = hex::decode(hash) else {
        return Ok(false);
    };
    let salt = hex::decode(salt)?;
    let actual = derive(password, &salt)?;
    Ok(crypto_cmp_bytes(&expected, &actual))
}
