//! Request dispatcher
//!
//! Single entry point for every request. Per request it:
//!
//! 1. mints a correlation id and opens a tracing span carrying it
//! 2. answers `OPTIONS` with preflight headers, without a route lookup
//! 3. resolves the route (not found / not implemented)
//! 4. runs the handler inside a panic boundary
//! 5. renders the envelope: payload, `{"response":"ok"}` or
//!    `{"error": "<message>"}` with the kind's HTTP status
//!
//! This is the only place an [`ApiError`] becomes a response.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::auth::client_ip;
use super::cors::CorsPolicy;
use super::handler::{HandlerResult, RequestContext};
use super::router::RouteTable;
use crate::error::{ApiError, ErrorKind};

/// Default request body limit
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Honour `X-Forwarded-For` / `X-Real-IP`
    pub trust_forwarded_for: bool,
    /// Largest accepted body
    pub max_body_bytes: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            trust_forwarded_for: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Routes requests and renders responses
#[derive(Debug)]
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    cors: CorsPolicy,
    options: DispatchOptions,
}

impl Dispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(routes: Arc<RouteTable>, cors: CorsPolicy, options: DispatchOptions) -> Self {
        Self {
            routes,
            cors,
            options,
        }
    }

    /// Serve one request from `peer`
    pub async fn dispatch(&self, request: Request<Body>, peer: SocketAddr) -> Response {
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %request.method(),
            path = %request.uri().path(),
        );
        self.dispatch_inner(request, peer, request_id)
            .instrument(span)
            .await
    }

    async fn dispatch_inner(
        &self,
        request: Request<Body>,
        peer: SocketAddr,
        request_id: String,
    ) -> Response {
        let (parts, body) = request.into_parts();
        let ip = client_ip(&parts.headers, peer.ip(), self.options.trust_forwarded_for);
        let path = parts.uri.path().to_string();
        info!(%ip, %path, "request");
        telemetry_metrics::counter!("api_gate_requests_total").increment(1);

        if parts.method == Method::OPTIONS {
            let mut response = Self::envelope(StatusCode::OK, &json!({ "response": "ok" }));
            self.cors
                .apply_preflight(&parts.headers, response.headers_mut());
            telemetry_metrics::counter!("api_gate_responses_ok_total").increment(1);
            return response;
        }

        let result: HandlerResult = async {
            let (route, handler) = self.routes.resolve(&path)?;
            let body = axum::body::to_bytes(body, self.options.max_body_bytes)
                .await
                .map_err(|e| {
                    ApiError::with_message(ErrorKind::InvalidRequest, "Request body could not be read")
                        .with_source(e)
                })?;
            let ctx = RequestContext {
                request_id,
                method: parts.method.clone(),
                path: path.clone(),
                route: route.to_string(),
                headers: parts.headers.clone(),
                client_ip: ip,
                peer,
                body,
            };
            Self::run_contained(handler.handle(&ctx)).await
        }
        .await;

        self.render(result, &parts.headers)
    }

    /// Await a handler future, turning a panic into an internal error
    async fn run_contained<F>(fut: F) -> HandlerResult
    where
        F: Future<Output = HandlerResult>,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "Handler panicked");
                telemetry_metrics::counter!("api_gate_handler_panics_total").increment(1);
                Err(ApiError::internal(format!("handler panicked: {message}")))
            }
        }
    }

    /// Turn a handler outcome into the wire envelope
    pub fn render(&self, result: HandlerResult, request_headers: &HeaderMap) -> Response {
        let mut response = match result {
            Ok(Some(payload)) => {
                telemetry_metrics::counter!("api_gate_responses_ok_total").increment(1);
                Self::envelope(StatusCode::OK, &payload)
            }
            Ok(None) => {
                telemetry_metrics::counter!("api_gate_responses_ok_total").increment(1);
                Self::envelope(StatusCode::OK, &json!({ "response": "ok" }))
            }
            Err(e) => Self::render_error(&e),
        };
        self.cors.apply(request_headers, response.headers_mut());
        response
    }

    fn render_error(err: &ApiError) -> Response {
        let status = err.http_status();
        match err.kind() {
            ErrorKind::InternalError => {
                error!(code = err.code(), cause = ?err.cause(), "Internal error");
                telemetry_metrics::counter!("api_gate_internal_errors_total").increment(1);
            }
            ErrorKind::RouteNotFound | ErrorKind::RouteNotImplemented => {
                debug!(code = err.code(), status = status.as_u16(), "No handler");
            }
            ErrorKind::EmptyCredential
            | ErrorKind::KeyTooOld
            | ErrorKind::Malformed
            | ErrorKind::Expired
            | ErrorKind::InvalidSignature
            | ErrorKind::Unverifiable
            | ErrorKind::Invalid
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::Blacklisted
            | ErrorKind::UnauthorizedOrigin
            | ErrorKind::UnexpectedSigningMethod
            | ErrorKind::InsufficientPermission
            | ErrorKind::InvalidRequest => {
                warn!(
                    code = err.code(),
                    status = status.as_u16(),
                    error = %err.message(),
                    cause = ?err.cause(),
                    "Request rejected"
                );
            }
        }
        telemetry_metrics::counter!(
            "api_gate_responses_failed_total",
            "http" => status.as_u16().to_string(),
            "code" => err.code().to_string()
        )
        .increment(1);

        Self::envelope(status, &json!({ "error": err.message() }))
    }

    fn envelope(status: StatusCode, body: &Value) -> Response {
        (status, Json(body)).into_response()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
