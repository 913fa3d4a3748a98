//! Constant-time comparison

use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

/// Compare two byte slices in constant time.
///
/// Slices of different length are hashed with SHA-512 first, so the final
/// comparison always runs over equal-length buffers and the length check
/// does not branch early.
#[must_use]
pub fn crypto_cmp_bytes(x: &[u8], y: &[u8]) -> bool {
    if x.len() == y.len() {
        return bool::from(x.ct_eq(y));
    }
    let hx = Sha512::digest(x);
    let hy = Sha512::digest(y);
    bool::from(hx.as_slice().ct_eq(hy.as_slice()))
}

/// String form of [`crypto_cmp_bytes`]
#[must_use]
pub fn crypto_cmp_str(x: &str, y: &str) -> bool {
    crypto_cmp_bytes(x.as_bytes(), y.as_bytes())
}
