//! Request authentication
//!
//! Supports:
//! - Bearer token via `Authorization: bearer <token>` (scheme case-insensitive)
//! - The same token in a named cookie as fallback
//! - Client IP resolution through `X-Forwarded-For` / `X-Real-IP`
//! - Minimum permission per route

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, header};
use tracing::{debug, info};

use super::handler::RequestContext;
use crate::error::{ApiError, ErrorKind};
use crate::token::{Permission, TokenService, VerifiedToken};

/// Cookie name used when none is configured
pub const DEFAULT_COOKIE_NAME: &str = "gate_auth";

const BEARER_PREFIX: &str = "bearer ";

/// Extract the raw token from the `Authorization` header or `cookie_name`
#[must_use]
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let scheme = v.get(..BEARER_PREFIX.len())?;
            scheme
                .eq_ignore_ascii_case(BEARER_PREFIX)
                .then(|| v[BEARER_PREFIX.len()..].trim())
        })
        .filter(|t| !t.is_empty());

    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Client IP: first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// socket peer. Forwarding headers are ignored unless `trust_forwarded`.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: IpAddr, trust_forwarded: bool) -> IpAddr {
    if !trust_forwarded {
        return peer;
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        })
        .unwrap_or(peer)
}

/// Binds requests to verified identities
#[derive(Debug)]
pub struct Authenticator {
    tokens: Arc<TokenService>,
    cookie_name: String,
}

impl Authenticator {
    /// Create an authenticator
    pub fn new(tokens: Arc<TokenService>, cookie_name: impl Into<String>) -> Self {
        Self {
            tokens,
            cookie_name: cookie_name.into(),
        }
    }

    /// Underlying token service
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Verify the request's token
    pub async fn authenticate(&self, ctx: &RequestContext) -> Result<VerifiedToken, ApiError> {
        let Some(token) = extract_token(&ctx.headers, &self.cookie_name) else {
            debug!("No credentials on request");
            return Err(ApiError::new(ErrorKind::EmptyCredential));
        };
        self.tokens.verify(&token, ctx.client_ip).await
    }

    /// Verify the request's token and require at least `min` permission
    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        min: Permission,
    ) -> Result<VerifiedToken, ApiError> {
        let verified = self.authenticate(ctx).await?;
        info!(
            user_id = verified.user_id,
            permission = %verified.permission,
            "authorized"
        );
        if verified.permission < min {
            return Err(ApiError::with_message(
                ErrorKind::InsufficientPermission,
                format!(
                    "Insufficient permission. Needed {min}, has {}",
                    verified.permission
                ),
            ));
        }
        Ok(verified)
    }
}
