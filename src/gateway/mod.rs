//! Gateway implementation

pub mod auth;
pub mod cors;
pub mod dispatcher;
pub mod endpoints;
pub mod handler;
pub mod router;
mod server;

pub use auth::{Authenticator, client_ip, extract_token};
pub use cors::CorsPolicy;
pub use dispatcher::{DispatchOptions, Dispatcher};
pub use endpoints::{CAPABILITY_PREFIX, Routes, build_routes};
pub use handler::{Handler, HandlerResult, RequestContext, handler_fn};
pub use router::{RouteEntry, RouteError, RouteTable};
pub use server::Gateway;
