//! Gateway server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::response::Response;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::auth::Authenticator;
use super::cors::CorsPolicy;
use super::dispatcher::{Dispatcher, panic_message};
use super::endpoints::{CAPABILITY_PREFIX, Routes, build_routes};
use crate::config::Config;
use crate::error::ApiError;
use crate::token::store::spawn_reaper;
use crate::token::{InMemoryRevocationStore, RevocationStore, TokenService};
use crate::{Error, Result};

/// API gate server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Where the configuration came from, re-read on SIGHUP
    config_path: Option<PathBuf>,
    /// Token service shared with the handlers
    tokens: Arc<TokenService>,
    /// Capability route up to the user id
    capability_base: String,
    /// Request dispatcher
    dispatcher: Arc<Dispatcher>,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// # Errors
    ///
    /// Fails when the configuration does not validate or the signing keys,
    /// permission seeds or reserved routes are invalid.
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        config.validate()?;
        let keys = config.token.build_key_store()?;
        info!(
            current = %keys.current_id(),
            keys = keys.key_ids().count(),
            "Loaded signing keys"
        );

        let permissions = Arc::new(config.permissions.build()?);
        let revocations: Arc<dyn RevocationStore> = Arc::new(InMemoryRevocationStore::new());
        let tokens = Arc::new(TokenService::new(
            keys,
            config.token.settings(),
            revocations,
            permissions,
        ));

        let auth = Arc::new(Authenticator::new(
            Arc::clone(&tokens),
            config.token.cookie_name.clone(),
        ));
        let Routes {
            table,
            capability_secret,
        } = build_routes(&auth, config.token.admin_lifetime, &config.reserved_routes)?;
        let capability_base = format!("{CAPABILITY_PREFIX}{capability_secret}/");
        info!(routes = table.len(), "Route table ready");

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(table),
            CorsPolicy::from_config(&config.cors),
            config.server.dispatch_options(),
        ));

        Ok(Self {
            config,
            config_path,
            tokens,
            capability_base,
            dispatcher,
        })
    }

    /// Dispatcher serving this gateway's routes
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run the gateway
    ///
    /// # Errors
    ///
    /// Fails when the listen address is invalid or cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        #[cfg(feature = "metrics")]
        if self.config.metrics.enabled {
            install_metrics_exporter(&self.config.metrics.address)?;
        }

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        spawn_reaper(
            Arc::clone(self.tokens.revocations()),
            self.config.token.reap_interval,
            shutdown_tx.subscribe(),
        );
        self.spawn_key_reload(shutdown_tx.subscribe());

        let app = Router::new()
            .fallback(dispatch)
            .with_state(Arc::clone(&self.dispatcher))
            .layer(CatchPanicLayer::custom(render_panic))
            .layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(addr).await?;
        info!("API gate listening on http://{addr}");
        warn!(
            "Token capability (loopback only): http://{addr}{}<user_id>",
            self.capability_base
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }

    /// Re-read the signing keys on SIGHUP and swap them in
    #[cfg(unix)]
    fn spawn_key_reload(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let tokens = Arc::clone(&self.tokens);
        let path = self.config_path.clone();
        let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGHUP handler, key reload disabled");
                return;
            }
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = hangup.recv() => {
                        let reloaded = Config::load(path.as_deref())
                            .and_then(|config| config.token.build_key_store());
                        match reloaded {
                            Ok(keys) => tokens.rotate(keys),
                            Err(e) => error!(error = %e, "Key reload failed, keeping current keys"),
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    #[cfg(not(unix))]
    fn spawn_key_reload(&self, _shutdown: tokio::sync::broadcast::Receiver<()>) {}
}

/// Axum fallback: every request goes through the dispatcher
async fn dispatch(
    State(dispatcher): State<Arc<Dispatcher>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    dispatcher.dispatch(request, peer).await
}

/// Last-resort panic response for anything outside a handler
fn render_panic(payload: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let message = panic_message(payload.as_ref());
    error!(panic = %message, "Panic outside handler");
    let err = ApiError::internal(message);
    axum::response::IntoResponse::into_response((
        err.http_status(),
        axum::Json(serde_json::json!({ "error": err.message() })),
    ))
}

#[cfg(feature = "metrics")]
fn install_metrics_exporter(address: &str) -> Result<()> {
    let addr: SocketAddr = address
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics address: {e}")))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::Config(format!("Metrics exporter: {e}")))?;
    info!("Prometheus metrics on http://{addr}/metrics");
    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
