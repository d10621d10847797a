//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for
//! production. Config precedence: env vars > .env file > config.toml > defaults
//!
//! The activation / signature / security sections are plain data with
//! `Default` impls matching the protocol defaults, so the service layer can be
//! constructed in tests without touching process environment.

use serde::Deserialize;
use std::sync::OnceLock;

use crate::models::activation::KeyEncryption;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("Config not initialized. Call sigil_common::config::init() first.")
}

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code
/// accesses config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("database.max_connections", 20)?
        .set_default("database.min_connections", 5)?
        .set_default("activation.validity_ms", 300_000)? // 5 min
        .set_default("activation.id_generation_max_attempts", 10)?
        .set_default("activation.code_generation_max_attempts", 10)?
        .set_default("signature.max_failed_attempts", 5)?
        .set_default("signature.validation_lookahead", 20)?
        .set_default("security.restrict_access", false)?
        .set_default("security.server_private_key_encryption", "NO_ENCRYPTION")?
        .set_default("security.master_db_encryption_key", "")?
        .set_default("sweep.interval_secs", 60)?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (SIGIL_SERVER__HOST, SIGIL_DATABASE__URL, etc.)
        .add_source(
            config::Environment::with_prefix("SIGIL")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub activation: ActivationConfig,
    pub signature: SignatureConfig,
    pub security: SecurityConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL or SQLite connection URL
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ActivationConfig {
    /// How long a fresh activation stays claimable before the sweep removes
    /// it. Short by design: it bounds the window in which a leaked activation
    /// code is useful to an attacker.
    pub validity_ms: u64,
    /// Retry budget for UUID collisions when minting activation IDs.
    pub id_generation_max_attempts: u32,
    /// Retry budget for activation-code collisions among non-terminal records.
    pub code_generation_max_attempts: u32,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            validity_ms: 300_000,
            id_generation_max_attempts: 10,
            code_generation_max_attempts: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignatureConfig {
    /// Consecutive failures that block an activation.
    pub max_failed_attempts: u32,
    /// How many future counter values a verification will accept, tolerating
    /// client retries and dropped responses.
    pub validation_lookahead: u32,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            validation_lookahead: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    /// When true, every request must present HTTP Basic credentials matching
    /// a row in `pa_integration`.
    pub restrict_access: bool,
    /// How server private keys are protected in the database.
    pub server_private_key_encryption: KeyEncryption,
    /// Base64 server-wide secret for the AES_HMAC at-rest mode. Must be
    /// non-empty when that mode is selected.
    pub master_db_encryption_key: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            restrict_access: false,
            server_private_key_encryption: KeyEncryption::NoEncryption,
            master_db_encryption_key: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweepConfig {
    /// Period of the background expiration sweep.
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}
