//! Revocation store: one record per issued token id.
//!
//! The [`RevocationStore`] trait abstracts over storage backends. The
//! in-process implementation is [`InMemoryRevocationStore`], backed by a
//! `DashMap`, with a background reaper that drops records past their expiry.
//!
//! # Invariants
//!
//! - A token id is recorded exactly once, at issuance.
//! - `valid` only ever goes from `true` to `false`.
//! - Every [`RevocationStore::is_revoked`] call on a known id bumps exactly
//!   one usage counter. Check and count happen under the same shard lock.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from a revocation or permission backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// Token id already recorded
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// Lookup target does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of one issued token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Token id (`jti`)
    pub token_id: String,
    /// Owner
    pub user_id: u64,
    /// Issuance time
    pub issued_at: DateTime<Utc>,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
    /// Client IP at issuance (for audit)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    /// Cleared on revocation
    pub valid: bool,
    /// Lookups while valid
    pub valid_usage_count: u64,
    /// Lookups after revocation
    pub invalid_usage_count: u64,
}

impl RevocationRecord {
    /// Fresh, valid record with zeroed counters
    #[must_use]
    pub fn new(
        token_id: impl Into<String>,
        user_id: u64,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        client_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            token_id: token_id.into(),
            user_id,
            issued_at,
            expires_at,
            client_ip,
            valid: true,
            valid_usage_count: 0,
            invalid_usage_count: 0,
        }
    }
}

/// Trait abstracting the revocation backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// request tasks.
#[async_trait::async_trait]
pub trait RevocationStore: Send + Sync + 'static {
    /// Record a newly issued token id. Fails on a duplicate id.
    async fn record(&self, record: RevocationRecord) -> Result<(), StoreError>;

    /// Whether the token id may no longer be used.
    ///
    /// Unknown ids count as revoked. Known ids have one usage counter
    /// incremented as part of the same operation.
    async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError>;

    /// Mark a token id invalid. Returns `false` for unknown ids.
    async fn revoke(&self, token_id: &str) -> Result<bool, StoreError>;

    /// Snapshot of a record
    async fn get(&self, token_id: &str) -> Result<Option<RevocationRecord>, StoreError>;

    /// Drop records whose expiry is before `now`. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// In-memory revocation store keyed by token id
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    records: DashMap<String, RevocationRecord>,
}

impl InMemoryRevocationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn record(&self, record: RevocationRecord) -> Result<(), StoreError> {
        match self.records.entry(record.token_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(record.token_id)),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError> {
        let Some(mut record) = self.records.get_mut(token_id) else {
            debug!(jti = %token_id, "Unknown token id treated as revoked");
            return Ok(true);
        };
        if record.valid {
            record.valid_usage_count += 1;
            Ok(false)
        } else {
            record.invalid_usage_count += 1;
            Ok(true)
        }
    }

    async fn revoke(&self, token_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .records
            .get_mut(token_id)
            .map(|mut record| record.valid = false)
            .is_some())
    }

    async fn get(&self, token_id: &str) -> Result<Option<RevocationRecord>, StoreError> {
        Ok(self.records.get(token_id).map(|r| r.value().clone()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at >= now);
        Ok(before.saturating_sub(self.records.len()))
    }
}

/// Shortest purge period; a zero interval is raised to this
pub const MIN_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn a background task that purges expired records every `interval`.
///
/// Purging is safe because an expired token is rejected before the store is
/// consulted. The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    store: Arc<dyn RevocationStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let interval = if interval.is_zero() {
        tracing::warn!(
            fallback_secs = MIN_REAP_INTERVAL.as_secs(),
            "Zero reap interval, using fallback"
        );
        MIN_REAP_INTERVAL
    } else {
        interval
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.purge_expired(Utc::now()).await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "Purged expired revocation records"),
                        Err(e) => tracing::warn!(error = %e, "Revocation purge failed"),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Revocation reaper shutting down");
                    break;
                }
            }
        }
    });
}
