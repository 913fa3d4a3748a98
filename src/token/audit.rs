//! Audit logging for the token lifecycle.
//!
//! Every event is emitted as one structured `tracing` line, so the trail is
//! queryable by any log aggregator.
//!
//! | Event | When |
//! |-------|------|
//! | `token.issued` | A token was recorded and signed |
//! | `token.used` | A token passed every verification step |
//! | `token.rejected` | Verification failed; `code` names the step |
//! | `token.revoked` | A token id was marked invalid |

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::store::RevocationRecord;
use crate::error::ErrorKind;

/// Structured audit event
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"token.issued"`).
    pub event: &'static str,
    /// Token owner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    /// Affected token id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_jti: Option<String>,
    /// Caller IP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    /// Expiry of an issued token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Numeric error code of a rejection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    /// Rejection class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn bare(event: &'static str) -> Self {
        Self {
            event,
            user_id: None,
            token_jti: None,
            client_ip: None,
            expires_at: None,
            code: None,
            reason: None,
        }
    }

    /// Construct a `token.issued` event.
    #[must_use]
    pub fn issued(record: &RevocationRecord) -> Self {
        Self {
            user_id: Some(record.user_id),
            token_jti: Some(record.token_id.clone()),
            client_ip: record.client_ip,
            expires_at: Some(record.expires_at),
            ..Self::bare("token.issued")
        }
    }

    /// Construct a `token.used` event.
    #[must_use]
    pub fn used(user_id: u64, jti: &str, client_ip: IpAddr) -> Self {
        Self {
            user_id: Some(user_id),
            token_jti: Some(jti.to_string()),
            client_ip: Some(client_ip),
            ..Self::bare("token.used")
        }
    }

    /// Construct a `token.rejected` event.
    #[must_use]
    pub fn rejected(kind: ErrorKind, client_ip: IpAddr) -> Self {
        Self {
            client_ip: Some(client_ip),
            code: Some(kind.code()),
            reason: Some(kind.to_string()),
            ..Self::bare("token.rejected")
        }
    }

    /// Construct a `token.revoked` event.
    #[must_use]
    pub fn revoked(jti: &str) -> Self {
        Self {
            token_jti: Some(jti.to_string()),
            ..Self::bare("token.revoked")
        }
    }
}

/// Emit an audit event via `tracing::info!`.
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "token audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
