//! Built-in routes
//!
//! | Path | Match | Access |
//! |------|-------|--------|
//! | `/health` | exact | public |
//! | `/v1/test` | exact | public |
//! | `/v1/auth/whoami` | exact | default |
//! | `/v1/auth/logout` | exact | default |
//! | `/v1/admin/revoke/<jti>` | prefix | admin |
//! | `/v0/admin/genjwtkey/<secret>/<user_id>` | prefix | capability, loopback peer only |
//!
//! Configured reserved routes are registered without a handler.
//!
//! The capability route is registered under the bare `CAPABILITY_PREFIX`
//! key. The per-process secret is never part of the route table; the
//! handler compares it in constant time after checking the peer. A wrong
//! secret and a non-loopback peer both answer `RouteNotFound`, the same as
//! a path nothing is registered under.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use tracing::warn;

use super::auth::Authenticator;
use super::handler::{Handler, HandlerResult, RequestContext, handler_fn};
use super::router::RouteTable;
use crate::config::ReservedRoute;
use crate::crypto::{crypto_cmp_str, random_bytes};
use crate::error::{ApiError, ErrorKind};
use crate::token::{Permission, TokenRequest};
use crate::Result;

/// Route prefix of the token-minting capability URL
pub const CAPABILITY_PREFIX: &str = "/v0/admin/genjwtkey/";

/// IPs a capability-issued token is bound to
pub const LOOPBACK_ORIGINS: [&str; 2] = ["127.0.0.1", "::1"];

const CAPABILITY_SECRET_LEN: usize = 32;

/// Health probe
struct Health;

#[async_trait::async_trait]
impl Handler for Health {
    async fn handle(&self, _ctx: &RequestContext) -> HandlerResult {
        Ok(Some(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        })))
    }
}

/// Identity of the caller
struct WhoAmI {
    auth: Arc<Authenticator>,
}

#[async_trait::async_trait]
impl Handler for WhoAmI {
    async fn handle(&self, ctx: &RequestContext) -> HandlerResult {
        let who = self.auth.authorize(ctx, Permission::DEFAULT).await?;
        Ok(Some(json!({
            "user_id": who.user_id,
            "permission": who.permission.level(),
            "permission_name": who.permission.name(),
        })))
    }
}

/// Revoke the caller's own token
struct Logout {
    auth: Arc<Authenticator>,
}

#[async_trait::async_trait]
impl Handler for Logout {
    async fn handle(&self, ctx: &RequestContext) -> HandlerResult {
        let who = self.auth.authorize(ctx, Permission::DEFAULT).await?;
        self.auth.tokens().revoke(&who.token_id).await?;
        Ok(None)
    }
}

/// Revoke any token id (admin only)
struct AdminRevoke {
    auth: Arc<Authenticator>,
}

#[async_trait::async_trait]
impl Handler for AdminRevoke {
    async fn handle(&self, ctx: &RequestContext) -> HandlerResult {
        let admin = self.auth.authorize(ctx, Permission::ADMIN).await?;
        let token_id = ctx.remainder().trim_matches('/');
        if token_id.is_empty() || token_id.contains('/') {
            return Err(ApiError::with_message(
                ErrorKind::InvalidRequest,
                "Expected /v1/admin/revoke/<token id>",
            ));
        }
        let revoked = self.auth.tokens().revoke(token_id).await?;
        warn!(admin = admin.user_id, jti = %token_id, revoked, "Admin token revocation");
        Ok(Some(json!({ "revoked": revoked })))
    }
}

/// Mint a short-lived token for any user.
///
/// Reachable only from a loopback peer holding the per-process secret.
/// Anything else is answered exactly like an unknown route.
struct CapabilityToken {
    secret: String,
    auth: Arc<Authenticator>,
    lifetime: Duration,
}

#[async_trait::async_trait]
impl Handler for CapabilityToken {
    async fn handle(&self, ctx: &RequestContext) -> HandlerResult {
        if !ctx.peer.ip().is_loopback() {
            warn!(peer = %ctx.peer, "Capability route hit from non-loopback peer");
            return Err(ApiError::new(ErrorKind::RouteNotFound));
        }
        let (secret, user) = ctx.remainder().split_once('/').unwrap_or((ctx.remainder(), ""));
        if !crypto_cmp_str(secret, &self.secret) {
            return Err(ApiError::new(ErrorKind::RouteNotFound));
        }

        let user_id = user
            .trim_end_matches('/')
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                ApiError::with_message(ErrorKind::InvalidRequest, "User id must be a positive integer")
            })?;

        let issued = self
            .auth
            .tokens()
            .generate(
                TokenRequest::new(user_id)
                    .expires_in(self.lifetime)
                    .client_ip(ctx.peer.ip())
                    .allowed_ips(LOOPBACK_ORIGINS),
            )
            .await?;
        warn!(user_id, jti = %issued.token_id, "Issued capability token");

        Ok(Some(json!({
            "user_id": user_id,
            "token": issued.token,
            "token_id": issued.token_id,
            "expires_at": issued.expires_at,
        })))
    }
}

/// The route table plus the per-process capability secret
pub struct Routes {
    /// Table to hand to the dispatcher
    pub table: RouteTable,
    /// Secret path segment of the capability route
    pub capability_secret: String,
}

impl Routes {
    /// Capability path for `user_id`, without scheme and host
    #[must_use]
    pub fn capability_path(&self, user_id: u64) -> String {
        format!("{CAPABILITY_PREFIX}{}/{user_id}", self.capability_secret)
    }
}

/// Build the built-in route table
pub fn build_routes(
    auth: &Arc<Authenticator>,
    admin_lifetime: Duration,
    reserved: &[ReservedRoute],
) -> Result<Routes> {
    let capability_secret = URL_SAFE_NO_PAD.encode(random_bytes(CAPABILITY_SECRET_LEN)?);
    let mut table = RouteTable::new();

    table.insert("/health", Some(Arc::new(Health)), true)?;
    table.insert("/v1/test", Some(handler_fn(|_| Ok(None))), true)?;
    table.insert(
        "/v1/auth/whoami",
        Some(Arc::new(WhoAmI {
            auth: Arc::clone(auth),
        })),
        true,
    )?;
    table.insert(
        "/v1/auth/logout",
        Some(Arc::new(Logout {
            auth: Arc::clone(auth),
        })),
        true,
    )?;
    table.insert(
        "/v1/admin/revoke/",
        Some(Arc::new(AdminRevoke {
            auth: Arc::clone(auth),
        })),
        false,
    )?;
    table.insert(
        CAPABILITY_PREFIX,
        Some(Arc::new(CapabilityToken {
            secret: capability_secret.clone(),
            auth: Arc::clone(auth),
            lifetime: admin_lifetime,
        })),
        false,
    )?;

    for route in reserved {
        table.insert(route.path.clone(), None, route.exact_match)?;
    }

    Ok(Routes {
        table,
        capability_secret,
    })
}
