//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::Duration;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    /// JSON file standing in for the device's local storage.
    pub local_store_path: PathBuf,
    pub billing_api_url: String,
    /// The web app's origin: allowed by CORS and used for checkout return URLs.
    pub app_origin: String,
    pub plus_price_id: Option<String>,
    pub pro_price_id: Option<String>,
    pub session_ttl: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        // --- Load Server and Database Settings ---
        let bind_address_str = var_or("BIND_ADDRESS", "127.0.0.1:4000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let local_store_path = PathBuf::from(var_or("LOCAL_STORE_PATH", "./local-storage.json"));

        // --- Load Billing Settings ---
        let billing_api_url = var_or("BILLING_API_URL", "http://localhost:8888/api")
            .trim_end_matches('/')
            .to_string();
        let app_origin = var_or("APP_ORIGIN", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();
        let plus_price_id = lookup("PLUS_PRICE_ID").filter(|id| !id.is_empty());
        let pro_price_id = lookup("PRO_PRICE_ID").filter(|id| !id.is_empty());

        let ttl_str = var_or("SESSION_TTL_DAYS", "30");
        let session_ttl = ttl_str
            .parse::<i64>()
            .ok()
            .filter(|days| *days > 0)
            .map(Duration::days)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "SESSION_TTL_DAYS".to_string(),
                    format!("'{}' is not a positive number of days", ttl_str),
                )
            })?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            local_store_path,
            billing_api_url,
            app_origin,
            plus_price_id,
            pro_price_id,
            session_ttl,
        })
    }
}
