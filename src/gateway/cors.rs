//! CORS decisions
//!
//! An origin is allowed in wildcard mode, or when it is byte-for-byte equal
//! to an entry of the allow list. Allowed origins are echoed back (never
//! `*`) together with `Access-Control-Allow-Credentials: true`.
//!
//! Wildcard mode echoes any origin with credentials. That is only safe when
//! no cookie-authenticated browser flow depends on the gate.

use axum::http::{HeaderMap, HeaderValue, header};

use crate::config::CorsConfig;

const PREFLIGHT_METHODS: &str = "POST, GET, OPTIONS";
const PREFLIGHT_HEADERS: &str = "X-PINGOTHER, Content-Type, Authorization";
const PREFLIGHT_MAX_AGE: &str = "86400";

/// Resolved CORS policy
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    enabled: bool,
    wildcard: bool,
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    /// Build from configuration
    #[must_use]
    pub fn from_config(config: &CorsConfig) -> Self {
        Self {
            enabled: config.enabled,
            wildcard: config.wildcard,
            allowed_origins: config.allowed_origins.clone(),
        }
    }

    /// Request origin, if present and allowed
    #[must_use]
    pub fn allowed_origin<'a>(&self, request: &'a HeaderMap) -> Option<&'a HeaderValue> {
        if !self.enabled {
            return None;
        }
        let origin = request.get(header::ORIGIN)?;
        if self.wildcard
            || self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.as_bytes() == origin.as_bytes())
        {
            Some(origin)
        } else {
            None
        }
    }

    /// Add origin and credentials headers when the origin is allowed
    pub fn apply(&self, request: &HeaderMap, response: &mut HeaderMap) {
        if let Some(origin) = self.allowed_origin(request) {
            response.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            response.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
            response.append(header::VARY, HeaderValue::from_static("Origin"));
        }
    }

    /// Add the preflight headers on top of [`Self::apply`]
    pub fn apply_preflight(&self, request: &HeaderMap, response: &mut HeaderMap) {
        response.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(PREFLIGHT_METHODS),
        );
        response.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(PREFLIGHT_HEADERS),
        );
        response.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(PREFLIGHT_MAX_AGE),
        );
        response.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        self.apply(request, response);
    }
}
