//! Error types for the gate
//!
//! Two layers live here:
//!
//! - [`Error`] covers startup and process-level failures (configuration,
//!   key loading, route table construction).
//! - [`ApiError`] is the per-request failure. Its [`ErrorKind`] carries the
//!   HTTP status and the stable numeric code used in logs and metrics. Only
//!   the dispatcher renders it onto the wire.

use std::{fmt, io};

use axum::http::StatusCode;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::gateway::router::RouteError;
use crate::token::keys::KeyStoreError;

/// Result type alias for the gate
pub type Result<T> = std::result::Result<T, Error>;

/// Startup and process-level errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Signing key material could not be loaded
    #[error("Key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    /// Route table could not be built
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    /// Crypto primitive failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classification of a request failure.
///
/// Codes in the 10000 range belong to token verification, codes in the 9000
/// range to routing and generic failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No token in header or cookie
    EmptyCredential,
    /// Token signed by an unknown or retired key
    KeyTooOld,
    /// Token could not be parsed
    Malformed,
    /// Token past its expiry
    Expired,
    /// Signature mismatch
    InvalidSignature,
    /// Verification failed for a reason outside the other classes
    Unverifiable,
    /// Token claims are structurally invalid
    Invalid,
    /// Audience does not name this service
    InvalidAudience,
    /// Issuer does not match this deployment
    InvalidIssuer,
    /// Token id was revoked or never recorded
    Blacklisted,
    /// Caller IP is not bound to the token
    UnauthorizedOrigin,
    /// Token header names a non-HS512 algorithm
    UnexpectedSigningMethod,
    /// Unclassified server-side fault
    InternalError,
    /// No route matches the request path
    RouteNotFound,
    /// Route exists but has no handler
    RouteNotImplemented,
    /// Caller permission below the route minimum
    InsufficientPermission,
    /// Request parameters could not be parsed
    InvalidRequest,
}

impl ErrorKind {
    /// HTTP status used when rendering this kind
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::KeyTooOld
            | Self::Malformed
            | Self::Unverifiable
            | Self::UnexpectedSigningMethod
            | Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::EmptyCredential
            | Self::Expired
            | Self::InvalidSignature
            | Self::Invalid
            | Self::InvalidAudience
            | Self::InvalidIssuer
            | Self::Blacklisted
            | Self::UnauthorizedOrigin
            | Self::InsufficientPermission => StatusCode::FORBIDDEN,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::RouteNotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// Stable numeric code for logs and metrics
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::EmptyCredential => 10000,
            Self::KeyTooOld => 10001,
            Self::Malformed => 10002,
            Self::Expired => 10003,
            Self::InvalidSignature => 10004,
            Self::Unverifiable => 10005,
            Self::Invalid => 10006,
            Self::InvalidAudience => 10007,
            Self::InvalidIssuer => 10008,
            Self::Blacklisted => 10009,
            Self::UnauthorizedOrigin => 10011,
            Self::UnexpectedSigningMethod => 10013,
            Self::InternalError => 9000,
            Self::RouteNotFound => 9001,
            Self::RouteNotImplemented => 9002,
            Self::InsufficientPermission => 9003,
            Self::InvalidRequest => 9005,
        }
    }

    /// Client-facing message when no specific one is supplied
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::EmptyCredential => "No auth provided. Access forbidden",
            Self::KeyTooOld => "Token signing key is no longer valid. Please log in again",
            Self::Malformed => "Malformed token",
            Self::Expired => "Token expired",
            Self::InvalidSignature => "Token signature is invalid",
            Self::Unverifiable => "Token could not be verified",
            Self::Invalid => "Invalid token",
            Self::InvalidAudience => "Token audience is invalid",
            Self::InvalidIssuer => "Token issuer is invalid",
            Self::Blacklisted => "Token has been revoked",
            Self::UnauthorizedOrigin => "Token is not valid from this origin",
            Self::UnexpectedSigningMethod => "Unexpected signing method. Want HS512",
            Self::InternalError => "Internal server error",
            Self::RouteNotFound => "No API endpoint matches your request",
            Self::RouteNotImplemented => "API endpoint not implemented",
            Self::InsufficientPermission => "Insufficient permission",
            Self::InvalidRequest => "Invalid request",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A classified request failure.
///
/// The optional `source` is logged by the dispatcher and never sent to the
/// client.
#[derive(Error, Debug)]
#[error("{kind} ({code}): {message}", code = .kind.code())]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ApiError {
    /// Error with the kind's default message
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.default_message().to_string(),
            source: None,
        }
    }

    /// Error with a custom client-facing message
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Internal error wrapping an underlying cause
    pub fn internal(source: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::InternalError).with_source(source)
    }

    /// Attach an underlying cause
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Failure classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// HTTP status for the response
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        self.kind.http_status()
    }

    /// Numeric code for logs and metrics
    #[must_use]
    pub fn code(&self) -> u32 {
        self.kind.code()
    }

    /// Message safe to show to the client.
    ///
    /// Internal errors always yield the generic message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self.kind {
            ErrorKind::InternalError => ErrorKind::InternalError.default_message(),
            _ => &self.message,
        }
    }

    /// Underlying cause, if any
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }
}

impl From<ErrorKind> for ApiError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}
