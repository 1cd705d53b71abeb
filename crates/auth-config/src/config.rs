//! Core configuration structures

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

#[cfg(test)]
use proptest_derive::Arbitrary;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub key_rotation: KeyRotationConfig,
    pub token_issuance: TokenIssuanceConfig,
    pub revocation: RevocationConfig,
    pub jwks_cache: JwksCacheConfig,
    pub translation: TranslationConfig,
    pub pkce: PkceConfig,
    pub features: FeatureConfig,
    pub logging: LoggingConfig,
    pub external_services: ExternalServicesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    pub host: String,
    pub workers: Option<usize>,
    pub max_connections: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[serde(skip_serializing)]
    pub mysql_url: secrecy::Secret<String>,
    pub sqlite_url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,
    pub idle_timeout: u64,
    pub max_lifetime: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

/// `key-rotation.*` — drives `KeyLifecycleManager` (C2).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct KeyRotationConfig {
    pub enabled: bool,
    /// Seconds between scheduled rotations (default 90 days).
    #[validate(range(min = 60))]
    pub rotation_interval_secs: u64,
    /// Grace period a new PENDING key sits before activation, to allow JWKS propagation.
    #[validate(range(min = 1))]
    pub pending_grace_secs: u64,
    /// Minimum time a DEPRECATED key is retained before retirement; must be
    /// >= the longest downstream token TTL in use.
    #[validate(range(min = 1))]
    pub retention_secs: u64,
    /// How long a RETIRED key is kept before physical deletion.
    #[validate(range(min = 1))]
    pub archive_ttl_secs: u64,
    #[validate(range(min = 1))]
    pub max_rotation_attempts: u32,
}

impl Default for KeyRotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rotation_interval_secs: 90 * 24 * 3600,
            pending_grace_secs: 300,
            retention_secs: 24 * 3600,
            archive_ttl_secs: 7 * 24 * 3600,
            max_rotation_attempts: 5,
        }
    }
}

/// `token-issuance.*` — drives `TokenIssuer` (C8).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TokenIssuanceConfig {
    #[validate(length(min = 1))]
    pub issuer: String,
    #[validate(range(min = 1))]
    pub token_ttl_secs: i64,
    /// `kid` to fall back to if the key store has no ACTIVE key (should
    /// never be exercised in steady state; guards cold start).
    pub key_id_fallback: Option<String>,
    pub forwarded_claims: Vec<String>,
    pub audience: Option<String>,
}

impl Default for TokenIssuanceConfig {
    fn default() -> Self {
        Self {
            issuer: "https://gateway.internal".to_string(),
            token_ttl_secs: 600,
            key_id_fallback: None,
            forwarded_claims: vec!["roles".to_string(), "permissions".to_string()],
            audience: None,
        }
    }
}

/// `revocation.*` — drives C9/C10/C11.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RevocationConfig {
    pub enabled: bool,
    pub check_user_revocation: bool,
    #[validate(range(min = 1))]
    pub bloom_capacity: usize,
    #[validate(range(exclusive_min = 0.0, exclusive_max = 1.0))]
    pub bloom_fp_rate: f64,
    #[validate(range(min = 1))]
    pub rebuild_interval_secs: u64,
    #[validate(range(min = 1))]
    pub query_timeout_ms: u64,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_user_revocation: true,
            bloom_capacity: 1_000_000,
            bloom_fp_rate: 0.01,
            rebuild_interval_secs: 3600,
            query_timeout_ms: 100,
        }
    }
}

/// `jwks-cache.*` — drives `JwksCache` (C4).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JwksCacheConfig {
    #[validate(range(min = 1))]
    pub refresh_interval_secs: u64,
    #[validate(range(min = 1))]
    pub stale_while_error_secs: u64,
    /// `max-age` advertised on the gateway's own published JWKS (C3).
    #[validate(range(min = 1))]
    pub jwks_public_ttl_secs: u64,
    /// The external IdP's JWKS endpoint `TokenValidator` fetches through
    /// this cache. Not one of spec.md §6's enumerated tuning keys, but
    /// required wiring — the cache has nothing to refresh without it.
    #[validate(length(min = 1))]
    pub external_jwks_url: String,
    /// Expected `iss` claim on inbound tokens; `None` skips issuer
    /// validation entirely.
    pub expected_issuer: Option<String>,
    #[validate(range(max = 300))]
    pub skew_tolerance_secs: u64,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
            stale_while_error_secs: 300,
            jwks_public_ttl_secs: 3600,
            external_jwks_url: "https://idp.example/.well-known/jwks.json".to_string(),
            expected_issuer: None,
            skew_tolerance_secs: 30,
        }
    }
}

/// `translation.*` — drives the tiered `ConfigStore` (C7).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TranslationConfig {
    /// `"db"` (L3 is the primary store) or a file path for static deployments.
    pub config_source: String,
    #[validate(range(min = 1))]
    pub l1_ttl_secs: u64,
    #[validate(range(min = 1))]
    pub l1_max_size: usize,
    pub l2_enabled: bool,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            config_source: "db".to_string(),
            l1_ttl_secs: 300,
            l1_max_size: 100,
            l2_enabled: false,
        }
    }
}

/// `pkce.*` — drives `PkceStore` (C12).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PkceConfig {
    pub required: bool,
    #[validate(range(min = 1))]
    pub challenge_ttl_secs: u64,
}

impl Default for PkceConfig {
    fn default() -> Self {
        Self {
            required: true,
            challenge_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub enabled_features: HashMap<String, bool>,
    pub feature_limits: HashMap<String, u64>,
    pub tenant_overrides: HashMap<String, HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(Arbitrary))]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub structured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalServicesConfig {
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(Arbitrary))]
pub struct RedisConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8081,
                host: "0.0.0.0".to_string(),
                workers: None,
                max_connections: Some(1000),
                timeout_seconds: Some(30),
            },
            database: DatabaseConfig {
                mysql_url: secrecy::Secret::new("mysql://localhost/gateway".to_string()),
                sqlite_url: Some(":memory:".to_string()),
                max_connections: 10,
                min_connections: 1,
                connection_timeout: 30,
                idle_timeout: 600,
                max_lifetime: 3600,
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            key_rotation: KeyRotationConfig::default(),
            token_issuance: TokenIssuanceConfig::default(),
            revocation: RevocationConfig::default(),
            jwks_cache: JwksCacheConfig::default(),
            translation: TranslationConfig::default(),
            pkce: PkceConfig::default(),
            features: FeatureConfig {
                enabled_features: HashMap::new(),
                feature_limits: HashMap::new(),
                tenant_overrides: HashMap::new(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
                output: "stdout".to_string(),
                structured: true,
            },
            external_services: ExternalServicesConfig { redis: None },
        }
    }
}
