//! Configuration management for the hospital management core
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with HMS_ prefix

use std::collections::HashMap;
use std::time::Duration;

use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Permission cache and sweep settings
    #[serde(default)]
    pub authorization: AuthorizationConfig,

    /// Billing engine settings
    #[serde(default)]
    pub billing: BillingConfig,

    /// Per-role session, MFA and rate-limit policy
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthorizationConfig {
    /// Lifetime of a cached permission decision
    pub cache_ttl_seconds: u64,

    /// Maximum number of cached entries
    pub cache_max_capacity: u64,

    /// How often the worker deactivates expired temporary permissions
    pub sweep_interval_seconds: u64,
}

impl AuthorizationConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 900,
            cache_max_capacity: 100_000,
            sweep_interval_seconds: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Tax rate in percent used when a bill carries no rate of its own
    pub default_tax_rate: Decimal,

    /// Attempts before a contended bill update gives up
    pub max_commit_retries: u32,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_tax_rate: Decimal::TEN,
            max_commit_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    /// Idle timeout for roles without an explicit entry
    pub default_session_timeout_minutes: u32,

    /// Request budget for roles without an explicit entry
    pub default_requests_per_minute: u32,

    /// Roles at or above this priority require MFA unless configured otherwise
    pub mfa_priority_threshold: i32,

    /// Overrides keyed by role slug
    #[serde(default = "default_role_policies")]
    pub roles: HashMap<String, RoleSecurityConfig>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RoleSecurityConfig {
    pub requires_mfa: Option<bool>,
    pub session_timeout_minutes: Option<u32>,
    pub requests_per_minute: Option<u32>,
}

fn default_role_policies() -> HashMap<String, RoleSecurityConfig> {
    let entry = |mfa: bool, timeout: u32, rpm: u32| RoleSecurityConfig {
        requires_mfa: Some(mfa),
        session_timeout_minutes: Some(timeout),
        requests_per_minute: Some(rpm),
    };

    HashMap::from([
        ("super-admin".to_string(), entry(true, 15, 300)),
        ("hospital-admin".to_string(), entry(true, 30, 240)),
        ("doctor".to_string(), entry(false, 60, 180)),
        ("pharmacist".to_string(), entry(false, 45, 120)),
        ("receptionist".to_string(), entry(false, 120, 120)),
    ])
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            default_session_timeout_minutes: 60,
            default_requests_per_minute: 120,
            mfa_priority_threshold: 80,
            roles: default_role_policies(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("HMS_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("authorization.cache_ttl_seconds", 900)?
            .set_default("authorization.cache_max_capacity", 100_000)?
            .set_default("authorization.sweep_interval_seconds", 300)?
            .set_default("billing.default_tax_rate", "10")?
            .set_default("billing.max_commit_retries", 3)?
            .set_default("security.default_session_timeout_minutes", 60)?
            .set_default("security.default_requests_per_minute", 120)?
            .set_default("security.mfa_priority_threshold", 80)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (HMS_ prefix)
            .add_source(
                Environment::with_prefix("HMS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
