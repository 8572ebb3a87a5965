//! Configuration and settings management
//!
//! Loads settings from optional config files and environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Initial delay before retrying a failed Telegram API call
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound for the delay between Telegram API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Number of retries for a Telegram API call after the first attempt
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Upper bound for the delay between listener restarts
pub const LISTENER_MAX_BACKOFF_MS: u64 = 60_000;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token. Bot features are disabled when absent.
    pub tg_bot_api: Option<String>,

    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Path to the static model list served on `/models`
    #[serde(default = "default_models_path")]
    pub models_path: String,

    /// Address the HTTP server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Deadline for a single outbound message during a broadcast
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Maximum number of sends in flight during one broadcast
    #[serde(default = "default_broadcast_concurrency")]
    pub broadcast_concurrency: usize,

    /// How many times a failed listener is restarted before giving up
    #[serde(default = "default_listener_max_restarts")]
    pub listener_max_restarts: u32,

    /// Initial delay before restarting a failed listener
    #[serde(default = "default_listener_backoff_ms")]
    pub listener_backoff_ms: u64,
}

fn default_database_path() -> String {
    "/sqlite3/tg.db".to_string()
}

fn default_models_path() -> String {
    "static/glowws_models.json".to_string()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

const fn default_send_timeout_secs() -> u64 {
    10
}

const fn default_broadcast_concurrency() -> usize {
    8
}

const fn default_listener_max_restarts() -> u32 {
    5
}

const fn default_listener_backoff_ms() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tg_bot_api: None,
            database_path: default_database_path(),
            models_path: default_models_path(),
            listen_addr: default_listen_addr(),
            send_timeout_secs: default_send_timeout_secs(),
            broadcast_concurrency: default_broadcast_concurrency(),
            listener_max_restarts: default_listener_max_restarts(),
            listener_backoff_ms: default_listener_backoff_ms(),
        }
    }
}

/// Build the layered configuration source.
///
/// # Errors
///
/// Returns a `ConfigError` if a present config file cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg.. `APP__LISTEN_ADDR=127.0.0.1:9000 ./glowws-server`
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE is mapped to snake_case, empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use glowws_server::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let mut settings: Self = build_config()?.try_deserialize()?;

        // The token is read under its historical name even if config mapping misses it
        if settings.tg_bot_api.is_none() {
            if let Ok(val) = std::env::var("TG_BOT_API") {
                if !val.is_empty() {
                    settings.tg_bot_api = Some(val);
                }
            }
        }

        Ok(settings)
    }

    /// Returns the bot token if one is configured and non-empty
    #[must_use]
    pub fn bot_token(&self) -> Option<&str> {
        self.tg_bot_api
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Per-recipient send deadline
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Broadcast concurrency, never below one
    #[must_use]
    pub fn broadcast_concurrency(&self) -> usize {
        self.broadcast_concurrency.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // Single test touching the process environment, so no cross-test races
    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("TG_BOT_API", "123456:dummy");
        env::set_var("DATABASE_PATH", "/tmp/glowws-test.db");
        env::set_var("LISTENER_MAX_RESTARTS", "0");

        let settings = Settings::new()?;
        assert_eq!(settings.bot_token(), Some("123456:dummy"));
        assert_eq!(settings.database_path, "/tmp/glowws-test.db");
        assert_eq!(settings.listener_max_restarts, 0);
        assert_eq!(settings.models_path, "static/glowws_models.json");

        env::remove_var("TG_BOT_API");
        env::remove_var("DATABASE_PATH");
        env::remove_var("LISTENER_MAX_RESTARTS");

        // Empty token is treated as unset
        env::set_var("TG_BOT_API", "");
        let settings = Settings::new()?;
        assert_eq!(settings.bot_token(), None);
        env::remove_var("TG_BOT_API");

        Ok(())
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.database_path, "/sqlite3/tg.db");
        assert_eq!(settings.listen_addr.port(), 8080);
        assert_eq!(settings.send_timeout(), Duration::from_secs(10));
        assert!(settings.bot_token().is_none());
    }

    #[test]
    fn test_broadcast_concurrency_floor() {
        let settings = Settings {
            broadcast_concurrency: 0,
            ..Settings::default()
        };
        assert_eq!(settings.broadcast_concurrency(), 1);
    }

    #[test]
    fn test_blank_token_is_absent() {
        let settings = Settings {
            tg_bot_api: Some("   ".to_string()),
            ..Settings::default()
        };
        assert!(settings.bot_token().is_none());
    }
}
