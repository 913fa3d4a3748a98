//! Bearer token subsystem.
//!
//! Tokens are HS512 JWS compact strings. The header carries the signing key
//! id (`kid`); the claims carry subject, issuer, audience, timestamps, the
//! token id and the IPs the token may be presented from.
//!
//! # Verification order
//!
//! Every check is a hard gate and short-circuits with its own
//! [`ErrorKind`]. The pure checks (parse, key, signature, expiry, claims,
//! origin) all run before the revocation and permission stores are touched.
//!
//! # Modules
//!
//! - [`keys`]: signing key snapshot
//! - [`claims`]: claim set
//! - [`store`]: revocation records
//! - [`permission`]: permission levels and their provider
//! - [`audit`]: structured lifecycle events

pub mod audit;
pub mod claims;
pub mod keys;
pub mod permission;
pub mod store;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use claims::{Claims, WILDCARD_ORIGIN};
pub use keys::{KeyStore, KeyStoreError};
pub use permission::{InMemoryPermissions, Permission, PermissionProvider};
pub use store::{InMemoryRevocationStore, RevocationRecord, RevocationStore, StoreError};

use self::audit::AuditEvent;
use crate::crypto::random_string;
use crate::error::{ApiError, ErrorKind};

/// Length of the random token id
pub const TOKEN_ID_LEN: usize = 32;

/// Default lifetime of an end-user token
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(31 * 24 * 60 * 60);

/// Fixed per-deployment token parameters
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Expected `iss`
    pub issuer: String,
    /// Expected `aud`
    pub audience: String,
    /// Lifetime when a request does not set one
    pub lifetime: Duration,
}

impl TokenSettings {
    /// Issuer string for a deployment mode
    #[must_use]
    pub fn issuer_for(name: &str, production: bool) -> String {
        if production {
            format!("{name}_production")
        } else {
            format!("{name}_debug")
        }
    }
}

/// Parameters of one issuance
#[derive(Debug, Clone)]
pub struct TokenRequest {
    /// Owner, must be positive
    pub user_id: u64,
    /// Lifetime override
    pub expires_in: Option<Duration>,
    /// Caller IP, recorded for audit
    pub client_ip: Option<IpAddr>,
    /// IPs the token may be presented from; `["*"]` for any
    pub allowed_ips: Vec<String>,
}

impl TokenRequest {
    /// Default-lifetime token usable from any IP
    #[must_use]
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            expires_in: None,
            client_ip: None,
            allowed_ips: vec![WILDCARD_ORIGIN.to_string()],
        }
    }

    /// Override the lifetime
    #[must_use]
    pub fn expires_in(mut self, lifetime: Duration) -> Self {
        self.expires_in = Some(lifetime);
        self
    }

    /// Record the caller IP
    #[must_use]
    pub fn client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Bind the token to explicit IPs
    #[must_use]
    pub fn allowed_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_ips = ips.into_iter().map(Into::into).collect();
        self
    }
}

/// A freshly signed token
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    /// Serialized JWS
    pub token: String,
    /// Token id (`jti`)
    pub token_id: String,
    /// Expiry
    pub expires_at: DateTime<Utc>,
}

/// Identity bound to a token that passed every check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedToken {
    /// Owner
    pub user_id: u64,
    /// Owner's current permission level
    pub permission: Permission,
    /// Token id (`jti`)
    pub token_id: String,
}

/// Issues and verifies tokens
pub struct TokenService {
    keys: ArcSwap<KeyStore>,
    settings: TokenSettings,
    validation: Validation,
    revocations: Arc<dyn RevocationStore>,
    permissions: Arc<dyn PermissionProvider>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("keys", &self.keys.load_full())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a token service
    #[must_use]
    pub fn new(
        keys: KeyStore,
        settings: TokenSettings,
        revocations: Arc<dyn RevocationStore>,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.leeway = 0;
        // Issuer and audience are compared after the signature, in order.
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            keys: ArcSwap::from_pointee(keys),
            settings,
            validation,
            revocations,
            permissions,
        }
    }

    /// Deployment parameters
    #[must_use]
    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// Current key snapshot
    #[must_use]
    pub fn key_store(&self) -> Arc<KeyStore> {
        self.keys.load_full()
    }

    /// Revocation backend
    #[must_use]
    pub fn revocations(&self) -> &Arc<dyn RevocationStore> {
        &self.revocations
    }

    /// Swap in a new key snapshot.
    ///
    /// Verifications already running keep the snapshot they loaded.
    pub fn rotate(&self, keys: KeyStore) {
        info!(current = %keys.current_id(), "Rotating signing keys");
        self.keys.store(Arc::new(keys));
    }

    /// Issue a token.
    ///
    /// The token id is recorded in the revocation store before the token is
    /// signed; if that write fails no token is returned.
    pub async fn generate(&self, request: TokenRequest) -> Result<IssuedToken, ApiError> {
        if request.user_id == 0 {
            return Err(ApiError::with_message(
                ErrorKind::InvalidRequest,
                "User id must be positive",
            ));
        }
        if request.allowed_ips.is_empty() {
            return Err(ApiError::with_message(
                ErrorKind::InvalidRequest,
                "Token must allow at least one origin",
            ));
        }

        let token_id = random_string(TOKEN_ID_LEN).map_err(ApiError::internal)?;
        let lifetime = request.expires_in.unwrap_or(self.settings.lifetime);
        let issued_at = Utc::now();
        let expires_at = chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .ok_or_else(|| {
                ApiError::with_message(ErrorKind::InvalidRequest, "Token lifetime out of range")
            })?;

        let claims = Claims {
            sub: request.user_id.to_string(),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: unix_secs(issued_at)?,
            exp: unix_secs(expires_at)?,
            jti: token_id.clone(),
            allowed_ips: request.allowed_ips,
        };

        let record = RevocationRecord::new(
            token_id.clone(),
            request.user_id,
            issued_at,
            expires_at,
            request.client_ip,
        );
        let event = AuditEvent::issued(&record);
        self.revocations
            .record(record)
            .await
            .map_err(ApiError::internal)?;

        let token = self.keys.load().sign(&claims).map_err(ApiError::internal)?;
        audit::emit(&event);

        Ok(IssuedToken {
            token,
            token_id,
            expires_at,
        })
    }

    /// Verify a token presented from `client_ip`
    pub async fn verify(&self, token: &str, client_ip: IpAddr) -> Result<VerifiedToken, ApiError> {
        let result = self.verify_inner(token, client_ip).await;
        match &result {
            Ok(v) => audit::emit(&AuditEvent::used(v.user_id, &v.token_id, client_ip)),
            Err(e) => audit::emit(&AuditEvent::rejected(e.kind(), client_ip)),
        }
        result
    }

    async fn verify_inner(
        &self,
        token: &str,
        client_ip: IpAddr,
    ) -> Result<VerifiedToken, ApiError> {
        let (claims, user_id) = self.check_stateless(token, client_ip)?;

        match self.revocations.is_revoked(&claims.jti).await {
            Ok(false) => {}
            Ok(true) => return Err(ApiError::new(ErrorKind::Blacklisted)),
            Err(e) => return Err(ApiError::internal(e)),
        }

        let permission = self
            .permissions
            .permission_of(user_id)
            .await
            .map_err(ApiError::internal)?;

        Ok(VerifiedToken {
            user_id,
            permission,
            token_id: claims.jti,
        })
    }

    /// Every check that needs no store access
    fn check_stateless(&self, token: &str, client_ip: IpAddr) -> Result<(Claims, u64), ApiError> {
        if token.is_empty() {
            return Err(ApiError::new(ErrorKind::EmptyCredential));
        }

        // Algorithms jsonwebtoken cannot name (`none`) still count as the wrong method
        if header_alg(token)?.is_some_and(|alg| alg != "HS512") {
            return Err(ApiError::new(ErrorKind::UnexpectedSigningMethod));
        }
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| ApiError::new(ErrorKind::Malformed).with_source(e))?;
        if header.alg != Algorithm::HS512 {
            return Err(ApiError::new(ErrorKind::UnexpectedSigningMethod));
        }

        let Some(kid) = header.kid.as_deref() else {
            return Err(ApiError::new(ErrorKind::KeyTooOld));
        };
        let keys = self.keys.load();
        let Some(secret) = keys.lookup(kid) else {
            debug!(kid, "Token references unknown or deprecated key");
            return Err(ApiError::new(ErrorKind::KeyTooOld));
        };

        let claims =
            jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(secret), &self.validation)
                .map_err(classify_decode_error)?
                .claims;

        if !claims.is_structurally_valid() {
            return Err(ApiError::new(ErrorKind::Invalid));
        }
        if claims.iss != self.settings.issuer {
            return Err(ApiError::new(ErrorKind::InvalidIssuer));
        }
        if claims.aud != self.settings.audience {
            return Err(ApiError::new(ErrorKind::InvalidAudience));
        }
        if !claims.allows_ip(client_ip) {
            return Err(ApiError::new(ErrorKind::UnauthorizedOrigin));
        }

        // Signed by us, so an unparsable subject is corruption, not a client fault.
        let user_id = claims.user_id().ok_or_else(|| {
            ApiError::internal(format!("token subject {:?} is not a user id", claims.sub))
        })?;

        Ok((claims, user_id))
    }

    /// Mark a token id invalid. Returns `false` when the id is unknown.
    pub async fn revoke(&self, token_id: &str) -> Result<bool, ApiError> {
        let known = self
            .revocations
            .revoke(token_id)
            .await
            .map_err(ApiError::internal)?;
        if known {
            audit::emit(&AuditEvent::revoked(token_id));
        }
        Ok(known)
    }
}

#[derive(Deserialize)]
struct RawHeader {
    alg: Option<String>,
}

/// `alg` of the JOSE header, read without restricting it to known algorithms
fn header_alg(token: &str) -> Result<Option<String>, ApiError> {
    let segment = token.split('.').next().unwrap_or_default();
    let raw = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| ApiError::new(ErrorKind::Malformed).with_source(e))?;
    let header: RawHeader = serde_json::from_slice(&raw)
        .map_err(|e| ApiError::new(ErrorKind::Malformed).with_source(e))?;
    Ok(header.alg)
}

fn classify_decode_error(err: jsonwebtoken::errors::Error) -> ApiError {
    use jsonwebtoken::errors::ErrorKind as Jwt;

    let kind = match err.kind() {
        Jwt::InvalidToken | Jwt::Base64(_) | Jwt::Json(_) | Jwt::Utf8(_) => ErrorKind::Malformed,
        Jwt::InvalidSignature => ErrorKind::InvalidSignature,
        Jwt::ExpiredSignature => ErrorKind::Expired,
        Jwt::InvalidAlgorithm => ErrorKind::UnexpectedSigningMethod,
        Jwt::ImmatureSignature | Jwt::MissingRequiredClaim(_) => ErrorKind::Invalid,
        _ => ErrorKind::Unverifiable,
    };
    ApiError::new(kind).with_source(err)
}

fn unix_secs(at: DateTime<Utc>) -> Result<u64, ApiError> {
    u64::try_from(at.timestamp()).map_err(ApiError::internal)
}
