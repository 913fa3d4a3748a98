//! Handler contract between the dispatcher and endpoint code

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use serde_json::Value;

use crate::error::ApiError;

/// Handler outcome: a JSON payload, `None` for the bare success envelope, or
/// a classified error
pub type HandlerResult = Result<Option<Value>, ApiError>;

/// Everything a handler may read about the request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id, also present on every log line of the request
    pub request_id: String,
    /// HTTP method
    pub method: Method,
    /// Full request path
    pub path: String,
    /// Route key that matched
    pub route: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Resolved client IP (forwarding headers applied)
    pub client_ip: IpAddr,
    /// Socket peer
    pub peer: SocketAddr,
    /// Raw body
    pub body: Bytes,
}

impl RequestContext {
    /// Part of the path after the matched route key
    #[must_use]
    pub fn remainder(&self) -> &str {
        self.path.get(self.route.len()..).unwrap_or_default()
    }
}

/// A route handler
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Serve one request
    async fn handle(&self, ctx: &RequestContext) -> HandlerResult;
}

/// Adapter turning a synchronous closure into a [`Handler`]
pub struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &RequestContext) -> HandlerResult {
        (self.0)(ctx)
    }
}

/// Wrap a closure as a shared handler
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}
