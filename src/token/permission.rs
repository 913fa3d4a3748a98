//! Permission levels and the provider that resolves them per user

use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::store::StoreError;

/// Ordered permission level, compared numerically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(i32);

impl Permission {
    /// Account is banned
    pub const BANNED: Self = Self(0);
    /// Any registered user
    pub const DEFAULT: Self = Self(1);
    /// User with a confirmed address
    pub const VERIFIED: Self = Self(2);
    /// Team member
    pub const TEAM: Self = Self(3);
    /// Administrator
    pub const ADMIN: Self = Self(4);

    /// Wrap a raw level
    #[must_use]
    pub const fn new(level: i32) -> Self {
        Self(level)
    }

    /// Raw level
    #[must_use]
    pub const fn level(self) -> i32 {
        self.0
    }

    /// Display name; out-of-range values clamp to the nearest named level
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            i32::MIN..=0 => "banned",
            1 => "default",
            2 => "verified",
            3 => "team",
            _ => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown permission name
#[derive(Debug, thiserror::Error)]
#[error("unknown permission level: {0}")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "banned" => Ok(Self::BANNED),
            "default" => Ok(Self::DEFAULT),
            "verified" => Ok(Self::VERIFIED),
            "team" => Ok(Self::TEAM),
            "admin" => Ok(Self::ADMIN),
            other => other
                .parse::<i32>()
                .map(Self)
                .map_err(|_| UnknownPermission(s.to_string())),
        }
    }
}

/// Source of a user's current permission level
#[async_trait::async_trait]
pub trait PermissionProvider: Send + Sync + 'static {
    /// Current level for `user_id`
    async fn permission_of(&self, user_id: u64) -> Result<Permission, StoreError>;
}

/// Permission table held in memory.
///
/// Users without an entry get `fallback`, or a `NotFound` error when no
/// fallback is configured.
#[derive(Debug, Default)]
pub struct InMemoryPermissions {
    levels: DashMap<u64, Permission>,
    fallback: Option<Permission>,
}

impl InMemoryPermissions {
    /// Empty table
    #[must_use]
    pub fn new(fallback: Option<Permission>) -> Self {
        Self {
            levels: DashMap::new(),
            fallback,
        }
    }

    /// Set the level of one user
    pub fn set(&self, user_id: u64, level: Permission) {
        self.levels.insert(user_id, level);
    }
}

#[async_trait::async_trait]
impl PermissionProvider for InMemoryPermissions {
    async fn permission_of(&self, user_id: u64) -> Result<Permission, StoreError> {
        self.levels
            .get(&user_id)
            .map(|entry| *entry.value())
            .or(self.fallback)
            .ok_or_else(|| StoreError::NotFound(format!("permission for user {user_id}")))
    }
}
