//! Environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::routing::RoutingKey;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token.
    pub bot_token: SecretString,
    /// Private operator group receiving review artifacts.
    pub admin_chat: i64,
    /// Public group approved reports are published to.
    pub public_chat: i64,
    /// Path of the local database file.
    pub db_path: PathBuf,
    /// Port for the health endpoint.
    pub port: u16,
    /// Optional keep-alive URL pinged every 10 minutes.
    pub keep_alive_url: Option<String>,
    /// Minimum gap between two non-album submissions from one sender.
    pub flood_cooldown: Duration,
    /// Flood refusals in a row before the sender is muted.
    pub flood_strike_limit: u32,
    /// Penalty applied when the flood strike limit is reached.
    pub flood_mute_duration: Duration,
    /// Quiet period after the last album fragment before finalizing.
    pub album_debounce: Duration,
    /// Penalty applied by reject+mute.
    pub mute_duration: Duration,
    /// Pending reports older than this are swept.
    pub report_max_age: Duration,
    /// Forum topic ids per routing key (`None` posts to the general feed).
    pub topic_accidents: Option<i64>,
    pub topic_radars: Option<i64>,
    pub topic_general: Option<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: SecretString::from(String::new()),
            admin_chat: 0,
            public_chat: 0,
            db_path: PathBuf::from("./data/tipline.db"),
            port: 10000,
            keep_alive_url: None,
            flood_cooldown: Duration::from_secs(4),
            flood_strike_limit: 3,
            flood_mute_duration: Duration::from_secs(300),
            album_debounce: Duration::from_millis(500),
            mute_duration: Duration::from_secs(3600),
            report_max_age: Duration::from_secs(3600 * 24),
            topic_accidents: Some(224),
            topic_radars: Some(222),
            topic_general: None,
        }
    }
}

impl Config {
    /// Read configuration from the environment. `BOT_TOKEN`,
    /// `ADMIN_GROUP_ID` and `PUBLIC_GROUP_ID` are required; everything else
    /// has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        Ok(Self {
            bot_token: SecretString::from(require_env("BOT_TOKEN")?),
            admin_chat: require_parsed("ADMIN_GROUP_ID")?,
            public_chat: require_parsed("PUBLIC_GROUP_ID")?,
            db_path: std::env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            port: optional_parsed("PORT")?.unwrap_or(defaults.port),
            keep_alive_url: std::env::var("KEEP_ALIVE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            flood_cooldown: optional_parsed("FLOOD_COOLDOWN_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.flood_cooldown),
            flood_strike_limit: optional_parsed("FLOOD_STRIKE_LIMIT")?
                .unwrap_or(defaults.flood_strike_limit),
            flood_mute_duration: optional_parsed("FLOOD_MUTE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.flood_mute_duration),
            album_debounce: optional_parsed("ALBUM_DEBOUNCE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.album_debounce),
            mute_duration: optional_parsed("MUTE_DURATION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.mute_duration),
            report_max_age: optional_parsed("REPORT_MAX_AGE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.report_max_age),
            topic_accidents: optional_parsed("PUBLIC_TOPIC_ACCIDENTS_ID")?
                .or(defaults.topic_accidents),
            topic_radars: optional_parsed("PUBLIC_TOPIC_RADARS_ID")?.or(defaults.topic_radars),
            topic_general: optional_parsed("PUBLIC_TOPIC_GENERAL_ID")?,
        })
    }

    /// Forum topic for a routing key.
    pub fn topic_for(&self, key: RoutingKey) -> Option<i64> {
        match key {
            RoutingKey::Accidents => self.topic_accidents,
            RoutingKey::Radars => self.topic_radars,
            RoutingKey::General => self.topic_general,
        }
    }
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn require_parsed<T: std::str::FromStr>(key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    require_env(key)?
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

fn optional_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => {
            raw.parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(None),
    }
}
