//! Environment-driven configuration shared by the bot binary and its workers.

use std::{env, time::Duration};

use thiserror::Error;

use crate::model::UserId;

const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:5000";
const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
const DEFAULT_ADMIN_SESSION_TTL_SECS: u64 = 1800;

/// Everything the bot process needs to boot: chat credentials, the admin
/// identity, the shared database and the worker cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    bot_token: String,
    admin_id: UserId,
    database_url: String,
    health_bind_address: String,
    telegram_api_url: String,
    poll_timeout: Duration,
    sweep_interval: Option<Duration>,
    admin_session_ttl: Duration,
}

impl BotConfig {
    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// process variables. Missing or malformed entries surface as
    /// `ConfigError` so the binary can report them before touching the network.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let admin_id = get_required_var("ADMIN_ID")?
            .parse::<i64>()
            .map_err(|source| ConfigError::InvalidNumber {
                key: "ADMIN_ID",
                source,
            })?;
        let sweep_secs = get_number_var("SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;

        Ok(Self {
            bot_token: get_required_var("BOT_TOKEN")?,
            admin_id: UserId::new(admin_id),
            database_url: get_required_var("DATABASE_URL")?,
            health_bind_address: get_optional_var("HEALTH_BIND_ADDRESS")
                .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string()),
            telegram_api_url: get_optional_var("TELEGRAM_API_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
            poll_timeout: Duration::from_secs(get_number_var(
                "POLL_TIMEOUT_SECS",
                DEFAULT_POLL_TIMEOUT_SECS,
            )?),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            admin_session_ttl: Duration::from_secs(get_number_var(
                "ADMIN_SESSION_TTL_SECS",
                DEFAULT_ADMIN_SESSION_TTL_SECS,
            )?),
        })
    }

    pub fn bot_token(&self) -> &str {
        &self.bot_token
    }

    pub fn admin_id(&self) -> UserId {
        self.admin_id
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn health_bind_address(&self) -> &str {
        &self.health_bind_address
    }

    pub fn telegram_api_url(&self) -> &str {
        &self.telegram_api_url
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// `None` when the periodic left-channel sweep is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval
    }

    pub fn admin_session_ttl(&self) -> Duration {
        self.admin_session_ttl
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or(ConfigError::MissingVar { key })
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn get_number_var(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match get_optional_var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|source| ConfigError::InvalidNumber { key, source }),
        None => Ok(default),
    }
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("KEYDROP_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    fn set_env() {
        std::env::set_var("KEYDROP_SKIP_DOTENV", "1");
        std::env::set_var("BOT_TOKEN", "123:abc");
        std::env::set_var("ADMIN_ID", "42");
        std::env::set_var("DATABASE_URL", "sqlite://test.db");
        std::env::remove_var("HEALTH_BIND_ADDRESS");
        std::env::remove_var("TELEGRAM_API_URL");
        std::env::remove_var("POLL_TIMEOUT_SECS");
        std::env::remove_var("SWEEP_INTERVAL_SECS");
        std::env::remove_var("ADMIN_SESSION_TTL_SECS");
    }

    #[test]
    fn config_loader_reads_env_with_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        let config = BotConfig::load_from_env().expect("config loads");
        assert_eq!(config.bot_token(), "123:abc");
        assert_eq!(config.admin_id(), UserId::new(42));
        assert_eq!(config.database_url(), "sqlite://test.db");
        assert_eq!(config.health_bind_address(), "0.0.0.0:5000");
        assert_eq!(config.telegram_api_url(), "https://api.telegram.org");
        assert_eq!(config.poll_timeout(), Duration::from_secs(30));
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(3600)));
        assert_eq!(config.admin_session_ttl(), Duration::from_secs(1800));
    }

    #[test]
    fn optional_overrides_are_applied() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("HEALTH_BIND_ADDRESS", "127.0.0.1:9000");
        std::env::set_var("SWEEP_INTERVAL_SECS", "0");
        std::env::set_var("POLL_TIMEOUT_SECS", "5");

        let config = BotConfig::load_from_env().expect("config loads");
        assert_eq!(config.health_bind_address(), "127.0.0.1:9000");
        assert_eq!(config.sweep_interval(), None);
        assert_eq!(config.poll_timeout(), Duration::from_secs(5));

        set_env();
    }

    #[test]
    fn required_env_vars_are_trimmed() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("DATABASE_URL", "  sqlite://trim.db  ");
        std::env::set_var("ADMIN_ID", " 7 ");

        let config = BotConfig::load_from_env().expect("config loads");
        assert_eq!(config.database_url(), "sqlite://trim.db");
        assert_eq!(config.admin_id(), UserId::new(7));

        set_env();
    }

    #[test]
    fn empty_required_env_var_is_treated_as_missing() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("BOT_TOKEN", "   ");

        let err = BotConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar { key: "BOT_TOKEN" }));

        set_env();
    }

    #[test]
    fn malformed_admin_id_is_rejected() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("ADMIN_ID", "not-a-number");

        let err = BotConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { key: "ADMIN_ID", .. }));

        set_env();
    }
}
