//! Configuration management
//!
//! Loaded from an optional YAML file, then overridden by `API_GATE_`
//! environment variables (`__` separates nesting, e.g.
//! `API_GATE_TOKEN__CURRENT_KEY_ID`).

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::crypto::CryptoService;
use crate::gateway::auth::DEFAULT_COOKIE_NAME;
use crate::gateway::dispatcher::{DEFAULT_MAX_BODY_BYTES, DispatchOptions};
use crate::token::{DEFAULT_TOKEN_LIFETIME, InMemoryPermissions, KeyStore, Permission, TokenSettings};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before secrets are resolved.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Token configuration
    pub token: TokenConfig,
    /// Seed permissions for the in-memory provider
    pub permissions: PermissionsConfig,
    /// Routes registered without a handler
    pub reserved_routes: Vec<ReservedRoute>,
    /// Prometheus exporter
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("API_GATE_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;

        // Before any env: secret is resolved
        config.load_env_files();

        Ok(config)
    }

    /// Reject settings that would fail later at runtime
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.token.reap_interval.is_zero() {
            return Err(Error::Config(
                "token.reap_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`.
    /// Only safe behind a proxy that overwrites these headers.
    pub trust_forwarded_for: bool,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            trust_forwarded_for: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Dispatcher settings derived from this section
    #[must_use]
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            trust_forwarded_for: self.trust_forwarded_for,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Emit CORS headers at all
    pub enabled: bool,
    /// Echo every origin (credentials included)
    pub wildcard: bool,
    /// Origins echoed back, compared byte-for-byte
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wildcard: false,
            allowed_origins: Vec::new(),
        }
    }
}

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Production deployment (selects the issuer suffix)
    pub production: bool,
    /// Issuer base name
    pub issuer_name: String,
    /// Audience (service identifier)
    pub audience: String,
    /// Key id that signs new tokens
    pub current_key_id: String,
    /// Key id to encoded secret: `""` (deprecated), hex, `env:VAR` or `enc:<base64>`
    pub signing_keys: HashMap<String, String>,
    /// Hex AEAD key used to unseal `enc:` secrets (supports `env:VAR_NAME`)
    pub key_encryption_key: Option<String>,
    /// End-user token lifetime
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,
    /// Lifetime of tokens minted through the capability route
    #[serde(with = "humantime_serde")]
    pub admin_lifetime: Duration,
    /// Cookie checked when no bearer header is present
    pub cookie_name: String,
    /// How often expired revocation records are purged
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            production: false,
            issuer_name: "api_gate".to_string(),
            audience: "api_gate".to_string(),
            current_key_id: String::new(),
            signing_keys: HashMap::new(),
            key_encryption_key: None,
            lifetime: DEFAULT_TOKEN_LIFETIME,
            admin_lifetime: Duration::from_secs(60 * 60),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            reap_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl TokenConfig {
    /// Issuer for the configured deployment mode
    #[must_use]
    pub fn issuer(&self) -> String {
        TokenSettings::issuer_for(&self.issuer_name, self.production)
    }

    /// Issuer, audience and default lifetime
    #[must_use]
    pub fn settings(&self) -> TokenSettings {
        TokenSettings {
            issuer: self.issuer(),
            audience: self.audience.clone(),
            lifetime: self.lifetime,
        }
    }

    /// Resolve the key-encryption key (expand `env:` references)
    pub fn resolve_kek(&self) -> Result<Option<CryptoService>> {
        let Some(raw) = self.key_encryption_key.as_deref() else {
            return Ok(None);
        };
        let hex_key = if let Some(var_name) = raw.strip_prefix("env:") {
            env::var(var_name)
                .map_err(|_| Error::Config(format!("key_encryption_key: {var_name} is not set")))?
        } else {
            raw.to_string()
        };
        Ok(Some(CryptoService::from_hex(&hex_key)?))
    }

    /// Decode every configured signing key
    pub fn build_key_store(&self) -> Result<KeyStore> {
        if self.current_key_id.is_empty() {
            return Err(Error::Config("token.current_key_id is not set".to_string()));
        }
        let kek = self.resolve_kek()?;
        Ok(KeyStore::from_config(
            &self.current_key_id,
            &self.signing_keys,
            kek.as_ref(),
        )?)
    }
}

/// Permission seed data for the in-memory provider
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Level for users without an entry; unset means the lookup fails
    pub default_level: Option<String>,
    /// Per-user levels
    pub users: Vec<PermissionSeed>,
}

/// One user's level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionSeed {
    /// User id
    pub user_id: u64,
    /// Level name (`banned`, `default`, `verified`, `team`, `admin`) or number
    pub level: String,
}

impl PermissionsConfig {
    /// Build the provider
    pub fn build(&self) -> Result<InMemoryPermissions> {
        let fallback = self
            .default_level
            .as_deref()
            .map(str::parse::<Permission>)
            .transpose()
            .map_err(|e| Error::Config(e.to_string()))?;
        let provider = InMemoryPermissions::new(fallback);
        for seed in &self.users {
            let level = seed
                .level
                .parse::<Permission>()
                .map_err(|e| Error::Config(format!("user {}: {e}", seed.user_id)))?;
            provider.set(seed.user_id, level);
        }
        Ok(provider)
    }
}

/// Route served as "not implemented"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservedRoute {
    /// Literal path prefix
    pub path: String,
    /// Only match the full path
    #[serde(default)]
    pub exact_match: bool,
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Start the exporter
    pub enabled: bool,
    /// Listen address of the scrape endpoint
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9898".to_string(),
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "100ms", "30s", "5m", "1h", "31d")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "100ms", "30s", "5m", "1h", "31d" or a bare number of seconds
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // "ms" before "s" and "m"
        let (num, unit_secs) = if let Some(ms) = s.strip_suffix("ms") {
            return ms
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| format!("invalid duration {s:?}: {e}"));
        } else if let Some(n) = s.strip_suffix('s') {
            (n, 1)
        } else if let Some(n) = s.strip_suffix('m') {
            (n, 60)
        } else if let Some(n) = s.strip_suffix('h') {
            (n, 60 * 60)
        } else if let Some(n) = s.strip_suffix('d') {
            (n, 24 * 60 * 60)
        } else {
            (s, 1)
        };
        num.trim()
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(unit_secs))
            .map(Duration::from_secs)
            .ok_or_else(|| format!("invalid duration {s:?}"))
    }
}
