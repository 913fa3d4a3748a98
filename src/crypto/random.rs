//! Secure random generation

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::warn;

use super::CryptoError;

/// Attempts made against the platform CSPRNG before failing
pub const RANDOM_RETRY_LIMIT: u32 = 10;

const ALPHANUMERIC: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

// Largest multiple of 62 that fits in a byte; bytes at or above it are
// rejected to keep the distribution uniform.
const REJECT_AT: u8 = 248;

/// Fill `buf` from the platform CSPRNG, retrying transient failures.
///
/// The buffer is only meaningful when `Ok` is returned.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    fill_random_with(buf, getrandom::fill)
}

fn fill_random_with<F>(buf: &mut [u8], mut source: F) -> Result<(), CryptoError>
where
    F: FnMut(&mut [u8]) -> Result<(), getrandom::Error>,
{
    let mut attempt = 1;
    loop {
        match source(buf) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < RANDOM_RETRY_LIMIT => {
                warn!(attempt, error = %e, "CSPRNG read failed, retrying");
                attempt += 1;
            }
            Err(e) => {
                return Err(CryptoError::RandomUnavailable {
                    attempts: attempt,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// `n` bytes from the platform CSPRNG
pub fn random_bytes(n: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; n];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Random alphanumeric string of `n` characters.
///
/// Uses rejection sampling so every symbol is equally likely.
pub fn random_string(n: usize) -> Result<String, CryptoError> {
    let mut out = String::with_capacity(n);
    let mut chunk = [0u8; 64];
    while out.len() < n {
        fill_random(&mut chunk)?;
        for &b in &chunk {
            if b < REJECT_AT {
                out.push(char::from(ALPHANUMERIC[usize::from(b % 62)]));
                if out.len() == n {
                    break;
                }
            }
        }
    }
    Ok(out)
}

/// 32 random bytes, standard base64 encoded
pub fn generate_key() -> Result<String, CryptoError> {
    Ok(STANDARD.encode(random_bytes(32)?))
}
