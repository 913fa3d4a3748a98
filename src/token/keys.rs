//! Signing key store.
//!
//! Maps key ids to HMAC secrets. One id is current and signs every new
//! token; the id travels in the JWS `kid` header. Entries with an empty
//! secret are deprecated: they stay known only so that tokens naming them
//! fail closed. Unknown and deprecated ids look the same to a caller.
//!
//! A `KeyStore` is immutable. Rotation builds a new one and swaps it in
//! (see [`TokenService::rotate`](super::TokenService::rotate)).

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fmt;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use thiserror::Error;
use tracing::{debug, warn};

use super::claims::Claims;
use crate::crypto::{CryptoError, CryptoService};

/// Secrets shorter than this are accepted with a warning
pub const RECOMMENDED_KEY_LEN: usize = 64;

/// Prefix of a secret read from an environment variable (hex)
pub const ENV_PREFIX: &str = "env:";

/// Prefix of a secret sealed with the key-encryption key (unpadded base64)
pub const SEALED_PREFIX: &str = "enc:";

/// Errors raised while loading keys or signing
#[derive(Error, Debug)]
pub enum KeyStoreError {
    /// The current key id has no entry
    #[error("current signing key '{0}' is not configured")]
    MissingCurrent(String),

    /// The current key id is deprecated
    #[error("current signing key '{0}' is deprecated")]
    DeprecatedCurrent(String),

    /// A configured secret could not be decoded
    #[error("signing key '{id}': {reason}")]
    Decode {
        /// Key id
        id: String,
        /// What went wrong
        reason: String,
    },

    /// Unsealing a secret failed
    #[error("signing key '{id}': {source}")]
    Unseal {
        /// Key id
        id: String,
        /// Underlying failure
        source: CryptoError,
    },

    /// JWS encoding failed
    #[error("signing failed: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

/// Immutable key snapshot
pub struct KeyStore {
    current_id: String,
    keys: BTreeMap<String, Option<Vec<u8>>>,
    encoding: EncodingKey,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self
            .keys
            .iter()
            .map(|(id, secret)| match secret {
                Some(_) => id.clone(),
                None => format!("{id} (deprecated)"),
            })
            .collect();
        f.debug_struct("KeyStore")
            .field("current_id", &self.current_id)
            .field("keys", &ids)
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Build a store from raw secrets. Empty secrets mark deprecated ids.
    pub fn load(
        current_id: impl Into<String>,
        keys: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) -> Result<Self, KeyStoreError> {
        let current_id = current_id.into();
        let keys: BTreeMap<String, Option<Vec<u8>>> = keys
            .into_iter()
            .map(|(id, secret)| {
                if secret.is_empty() {
                    (id, None)
                } else {
                    if secret.len() < RECOMMENDED_KEY_LEN {
                        warn!(
                            key_id = %id,
                            len = secret.len(),
                            "Signing key shorter than {RECOMMENDED_KEY_LEN} bytes"
                        );
                    }
                    (id, Some(secret))
                }
            })
            .collect();

        let encoding = match keys.get(&current_id) {
            None => return Err(KeyStoreError::MissingCurrent(current_id)),
            Some(None) => return Err(KeyStoreError::DeprecatedCurrent(current_id)),
            Some(Some(secret)) => EncodingKey::from_secret(secret),
        };

        debug!(
            current = %current_id,
            total = keys.len(),
            deprecated = keys.values().filter(|s| s.is_none()).count(),
            "Loaded signing keys"
        );

        Ok(Self {
            current_id,
            keys,
            encoding,
        })
    }

    /// Build a store from configured, encoded secrets.
    ///
    /// Each value is one of:
    /// - `""`: deprecated id
    /// - `env:VAR`: hex secret read from `VAR`
    /// - `enc:<base64>`: secret sealed under `kek`
    /// - anything else: hex secret
    pub fn from_config(
        current_id: &str,
        encoded: &HashMap<String, String>,
        kek: Option<&CryptoService>,
    ) -> Result<Self, KeyStoreError> {
        let mut keys = Vec::with_capacity(encoded.len());
        for (id, value) in encoded {
            keys.push((id.clone(), decode_secret(id, value, kek)?));
        }
        Self::load(current_id, keys)
    }

    /// Id used for signing
    #[must_use]
    pub fn current_id(&self) -> &str {
        &self.current_id
    }

    /// Secret for `id`; `None` for unknown and deprecated ids alike
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<&[u8]> {
        self.keys.get(id).and_then(|s| s.as_deref())
    }

    /// Whether `id` is known but retired
    #[must_use]
    pub fn is_deprecated(&self, id: &str) -> bool {
        matches!(self.keys.get(id), Some(None))
    }

    /// All known key ids
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Sign `claims` with HS512 under the current key
    pub fn sign(&self, claims: &Claims) -> Result<String, KeyStoreError> {
        let mut header = Header::new(Algorithm::HS512);
        header.kid = Some(self.current_id.clone());
        Ok(jsonwebtoken::encode(&header, claims, &self.encoding)?)
    }
}

fn decode_secret(
    id: &str,
    value: &str,
    kek: Option<&CryptoService>,
) -> Result<Vec<u8>, KeyStoreError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Vec::new());
    }

    let decode_err = |reason: String| KeyStoreError::Decode {
        id: id.to_string(),
        reason,
    };

    if let Some(var) = value.strip_prefix(ENV_PREFIX) {
        let raw = env::var(var).map_err(|e| decode_err(format!("env var {var}: {e}")))?;
        return hex::decode(raw.trim()).map_err(|e| decode_err(format!("env var {var}: {e}")));
    }

    if let Some(sealed) = value.strip_prefix(SEALED_PREFIX) {
        let kek = kek.ok_or_else(|| decode_err("sealed key but no key_encryption_key".into()))?;
        return kek.decrypt_base64(sealed).map_err(|source| KeyStoreError::Unseal {
            id: id.to_string(),
            source,
        });
    }

    hex::decode(value).map_err(|e| decode_err(format!("hex: {e}")))
}
