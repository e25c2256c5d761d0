//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to deserialize environment variables into a type-safe struct.

use std::time::Duration;

use serde::Deserialize;

use crate::services::LedgerSettings;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `POSTING_MAX_RETRIES` (optional): attempts per posting under contention, defaults to 3
/// - `POSTING_RETRY_BACKOFF_MS` (optional): backoff step between attempts, defaults to 25
/// - `POSTING_LOCK_TIMEOUT_MS` (optional): longest wait for an account lock, defaults to 2000
/// - `POSTING_TIMEOUT_MS` (optional): deadline for the pre-commit phase of one attempt,
///   defaults to 5000
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_max_retries")]
    pub posting_max_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub posting_retry_backoff_ms: u64,

    #[serde(default = "default_lock_timeout_ms")]
    pub posting_lock_timeout_ms: u64,

    #[serde(default = "default_posting_timeout_ms")]
    pub posting_timeout_ms: u64,
}

fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    25
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

fn default_posting_timeout_ms() -> u64 {
    5000
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        // Field names are converted automatically: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    /// Engine tuning derived from the posting settings.
    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            max_retries: self.posting_max_retries.max(1),
            retry_backoff: Duration::from_millis(self.posting_retry_backoff_ms),
            lock_timeout: Duration::from_millis(self.posting_lock_timeout_ms),
            posting_timeout: Duration::from_millis(self.posting_timeout_ms),
        }
    }
}
