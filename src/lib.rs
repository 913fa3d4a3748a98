//! API gate library
//!
//! Entry gate for a multi-tenant backend service.
//!
//! # Features
//!
//! - **Prefix routing**: longest literal prefix wins, optional exact match
//! - **Bearer tokens**: HS512 JWTs with key ids, rotation and deprecation
//! - **Revocation**: every issued token id is recorded and can be revoked
//! - **Origin binding**: tokens carry the IPs they may be presented from
//! - **Uniform envelope**: `{"response":"ok"}`, a payload, or `{"error": ...}`
//! - **Panic isolation**: a failing handler yields a 500, never a crash

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod token;

pub use error::{ApiError, Error, ErrorKind, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
    }

    Ok(())
}
