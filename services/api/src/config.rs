//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which `DatabaseService` implementation backs the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres { database_url: String },
    Memory,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub storage: StorageBackend,
    pub log_level: Level,
    pub classifier_url: String,
    pub classifier_timeout: Duration,
    pub telegram_bot_token: String,
    pub telegram_api_url: String,
    pub telegram_webhook_secret: Option<String>,
    pub session_ttl: Option<Duration>,
    pub feedback_log_path: PathBuf,
    pub cors_origin: String,
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
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Load Server and Storage Settings ---
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let storage = match var("STORAGE").as_deref().unwrap_or("postgres") {
            "postgres" => StorageBackend::Postgres {
                database_url: var("DATABASE_URL")
                    .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?,
            },
            "memory" => StorageBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue(
                    "STORAGE".to_string(),
                    format!("'{}' is not one of postgres, memory", other),
                ))
            }
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Classifier Settings ---
        let classifier_url = var("CLASSIFIER_URL")
            .unwrap_or_else(|| "http://localhost:8000".to_string())
            .trim_end_matches('/')
            .to_string();
        let classifier_timeout = Duration::from_secs(parse_secs(&var, "CLASSIFIER_TIMEOUT_SECS")?.unwrap_or(10));

        // --- Load Telegram Settings ---
        let telegram_bot_token = var("TELEGRAM_BOT_TOKEN")
            .ok_or_else(|| ConfigError::MissingVar("TELEGRAM_BOT_TOKEN".to_string()))?;
        let telegram_api_url = var("TELEGRAM_API_URL")
            .unwrap_or_else(|| "https://api.telegram.org".to_string())
            .trim_end_matches('/')
            .to_string();
        let telegram_webhook_secret = var("TELEGRAM_WEBHOOK_SECRET").filter(|s| !s.is_empty());

        // --- Load Conversation Settings ---
        let session_ttl = parse_secs(&var, "SESSION_TTL_SECS")?.map(Duration::from_secs);
        let feedback_log_path = var("FEEDBACK_LOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./feedback.jsonl"));

        let cors_origin = var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            storage,
            log_level,
            classifier_url,
            classifier_timeout,
            telegram_bot_token,
            telegram_api_url,
            telegram_webhook_secret,
            session_ttl,
            feedback_log_path,
            cors_origin,
        })
    }
}

fn parse_secs(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>, ConfigError> {
    match var(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(None),
    }
}
