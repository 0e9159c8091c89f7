use std::time::Duration;

use leadroute_core::error::CoreError;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(CoreError::Validation(format!(
                "LOG_FORMAT must be text or json, got {other:?}"
            ))),
        }
    }
}

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// PostgreSQL URL. Required only when running against `PgStore`.
    pub database_url: Option<String>,
    /// Connection pool size (default: `20`).
    pub db_max_connections: u32,
    /// Upper bound on one distribution pass (default: `2000` ms).
    pub evaluation_timeout: Duration,
    /// Delay before retrying a pass that lost a concurrent update (default: `25` ms).
    pub conflict_backoff: Duration,
    /// Automatic retries after a conflict before flagging for review (default: `1`).
    pub conflict_retries: u32,
    /// Broadcast buffer of the event bus (default: `1024`).
    pub event_bus_capacity: usize,
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 20,
            evaluation_timeout: Duration::from_millis(2000),
            conflict_backoff: Duration::from_millis(25),
            conflict_retries: 1,
            event_bus_capacity: 1024,
            log_format: LogFormat::Text,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `DATABASE_URL`            | unset   |
    /// | `DB_MAX_CONNECTIONS`      | `20`    |
    /// | `DISTRIBUTION_TIMEOUT_MS` | `2000`  |
    /// | `CONFLICT_BACKOFF_MS`     | `25`    |
    /// | `CONFLICT_RETRIES`        | `1`     |
    /// | `EVENT_BUS_CAPACITY`      | `1024`  |
    /// | `LOG_FORMAT`              | `text`  |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();
        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            evaluation_timeout: Duration::from_millis(parse_or(
                &lookup,
                "DISTRIBUTION_TIMEOUT_MS",
                defaults.evaluation_timeout.as_millis() as u64,
            )?),
            conflict_backoff: Duration::from_millis(parse_or(
                &lookup,
                "CONFLICT_BACKOFF_MS",
                defaults.conflict_backoff.as_millis() as u64,
            )?),
            conflict_retries: parse_or(&lookup, "CONFLICT_RETRIES", defaults.conflict_retries)?,
            event_bus_capacity: parse_or(&lookup, "EVENT_BUS_CAPACITY", defaults.event_bus_capacity)?,
            log_format: match lookup("LOG_FORMAT") {
                Some(raw) => raw.parse()?,
                None => defaults.log_format,
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, CoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::Validation(format!("{key} must be a valid number: {e}"))),
    }
}
