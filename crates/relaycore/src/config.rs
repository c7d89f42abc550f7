//! Runtime configuration
//!
//! Values are merged from, in order of increasing priority:
//! - built-in defaults (see [`defaults`])
//! - a TOML file (`relay.toml` unless a path is given)
//! - `RELAY_`-prefixed environment variables, nested keys separated by `__`
//!
//! ```toml
//! redis_url = "redis://127.0.0.1:6379/2"
//! webhook_host = "https://bots.example.com"
//!
//! [[bots]]
//! name = "marketing"
//! token = "123:abc"
//! chat_id = -1001234567890
//! personality = "parser"
//! schedules = [{ command = "popular", every_secs = 86400 }]
//! ```

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::identity::BotIdentity;

/// Config file read when no explicit path is given
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "RELAY_";

/// Built-in defaults
pub mod defaults {
    /// db 2, as the web and worker processes have always shared it
    pub const REDIS_URL: &str = "redis://127.0.0.1:6379/2";

    pub const LISTEN_ADDR: &str = "0.0.0.0:8000";

    /// Sleep between empty polls (milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 300;

    /// Number of recent update ids remembered per worker (0 disables dedup)
    pub const DEDUP_WINDOW: u64 = 1024;

    pub const DEDUP_TTL_SECS: u64 = 600;

    /// Shortest lease accepted; renewal happens every third of it
    pub const MIN_LOCK_TTL_SECS: u64 = 3;

    pub const BACKEND_TIMEOUT_SECS: u64 = 30;

    /// Users whose handler state a worker keeps at most
    pub const USER_STATE_CAPACITY: u64 = 10_000;

    /// Handler state of a user silent this long is forgotten
    pub const USER_STATE_IDLE_SECS: u64 = 24 * 60 * 60;
}

fn default_redis_url() -> String {
    defaults::REDIS_URL.to_string()
}

fn default_listen_addr() -> String {
    defaults::LISTEN_ADDR.to_string()
}

fn default_poll_interval_ms() -> u64 {
    defaults::POLL_INTERVAL_MS
}

fn default_dedup_window() -> u64 {
    defaults::DEDUP_WINDOW
}

fn default_dedup_ttl_secs() -> u64 {
    defaults::DEDUP_TTL_SECS
}

fn default_backend_timeout_secs() -> u64 {
    defaults::BACKEND_TIMEOUT_SECS
}

fn default_personality() -> String {
    "parser".to_string()
}

fn secret_token<'de, D>(deserializer: D) -> Result<Arc<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(Arc::new(SecretString::from(raw)))
}

/// Process-wide settings shared by the web and worker processes.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Address the webhook server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Public base URL announced to the provider; `None` skips announcement
    #[serde(default)]
    pub webhook_host: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Worker lock lease. `None` keeps the lock until released explicitly.
    #[serde(default)]
    pub lock_ttl_secs: Option<u64>,

    #[serde(default = "default_dedup_window")]
    pub dedup_window: u64,

    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,

    /// External service that runs the business logic of forwarded commands
    #[serde(default)]
    pub command_backend_url: Option<String>,

    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,

    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

/// One registered bot.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub name: String,

    #[serde(deserialize_with = "secret_token")]
    pub token: Arc<SecretString>,

    /// Administrative chat; doubles as the sender id of synthetic commands
    pub chat_id: i64,

    #[serde(default = "default_personality")]
    pub personality: String,

    /// `@username` without the `@`; when set, commands addressed to other
    /// bots (`/start@other_bot`) are ignored
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

/// A synthetic command injected on a fixed interval.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    pub every_secs: u64,
}

impl BotConfig {
    pub fn identity(&self) -> BotIdentity {
        BotIdentity::from_secret(Arc::clone(&self.token))
    }
}

impl ScheduleConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.every_secs)
    }
}

impl Settings {
    /// Loads settings from `path` (or [`DEFAULT_CONFIG_FILE`]) and the environment.
    ///
    /// A missing file is not an error; env-only deployments are supported.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let settings: Settings = Figment::new()
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from a TOML document, ignoring the environment.
    pub fn from_toml_str(document: &str) -> AppResult<Self> {
        let settings: Settings = Figment::from(Toml::string(document)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(AppError::Validation("poll_interval_ms must be positive".to_string()));
        }
        if let Some(ttl) = self.lock_ttl_secs {
            if ttl < defaults::MIN_LOCK_TTL_SECS {
                return Err(AppError::Validation(format!(
                    "lock_ttl_secs must be at least {}",
                    defaults::MIN_LOCK_TTL_SECS
                )));
            }
        }

        let mut names = HashSet::new();
        let mut keys = HashSet::new();
        for bot in &self.bots {
            if bot.name.trim().is_empty() {
                return Err(AppError::Validation("bot name must not be empty".to_string()));
            }
            if bot.identity().token().trim().is_empty() {
                return Err(AppError::Validation(format!("bot '{}' has an empty token", bot.name)));
            }
            if !names.insert(bot.name.as_str()) {
                return Err(AppError::Validation(format!("duplicate bot name '{}'", bot.name)));
            }
            if !keys.insert(bot.identity().queue_key()) {
                return Err(AppError::Validation(format!(
                    "bot '{}' reuses the token of another bot",
                    bot.name
                )));
            }
            for schedule in &bot.schedules {
                if schedule.every_secs == 0 {
                    return Err(AppError::Validation(format!(
                        "schedule '{}' of bot '{}' has a zero interval",
                        schedule.command, bot.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lock_ttl(&self) -> Option<Duration> {
        self.lock_ttl_secs.map(Duration::from_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn bot(&self, name: &str) -> AppResult<&BotConfig> {
        self.bots
            .iter()
            .find(|bot| bot.name == name)
            .ok_or_else(|| AppError::Validation(format!("unknown bot '{}'", name)))
    }
}
