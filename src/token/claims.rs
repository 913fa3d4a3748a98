//! Signed claim set carried by every token

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Entry in `allowed_ips` that matches every caller
pub const WILDCARD_ORIGIN: &str = "*";

/// Token payload.
///
/// The signing key id travels in the JWS header (`kid`), not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id as a decimal string
    pub sub: String,
    /// Deployment issuer
    #[serde(default)]
    pub iss: String,
    /// Service identifier
    #[serde(default)]
    pub aud: String,
    /// Issued-at (Unix epoch seconds)
    pub iat: u64,
    /// Expires-at (Unix epoch seconds)
    pub exp: u64,
    /// Random token id, the revocation key
    #[serde(default)]
    pub jti: String,
    /// IP literals the token may be presented from, or `"*"`
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

impl Claims {
    /// `iat` not after `exp` and a non-empty token id
    #[must_use]
    pub fn is_structurally_valid(&self) -> bool {
        self.iat <= self.exp && !self.jti.is_empty()
    }

    /// Whether the token may be presented from `ip`
    #[must_use]
    pub fn allows_ip(&self, ip: IpAddr) -> bool {
        self.allowed_ips.iter().any(|allowed| {
            allowed == WILDCARD_ORIGIN || allowed.parse::<IpAddr>().is_ok_and(|a| a == ip)
        })
    }

    /// Subject as a positive user id
    #[must_use]
    pub fn user_id(&self) -> Option<u64> {
        self.sub.parse::<u64>().ok().filter(|id| *id > 0)
    }
}
