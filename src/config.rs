use std::env;
use std::time::Duration;

use crate::engine::pricing::PricingConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected compact or json, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub publish_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    /// `None` keeps everything in memory.
    pub database: Option<DatabaseConfig>,
    /// PostgreSQL URL holding the queue tables; `None` uses the in-process bus.
    pub broker_url: Option<String>,
    pub queue_capacity: usize,
    pub event_buffer_size: usize,
    pub relay: RelayConfig,
    pub consume_timeout: Duration,
    pub pricing: PricingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let database = match non_empty("DB_HOST") {
            Some(host) => Some(DatabaseConfig {
                host,
                port: parse_or_default("DB_PORT", 5432)?,
                user: env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: env::var("DB_PASSWORD").unwrap_or_default(),
                name: env::var("DB_NAME").unwrap_or_else(|_| "courier_mesh".to_string()),
                max_connections: parse_or_default("DB_MAX_CONNECTIONS", 10)?,
                timeout_ms: parse_or_default("DB_TIMEOUT_MS", 5_000)?,
            }),
            None => None,
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_or_default("LOG_FORMAT", LogFormat::Compact)?,
            database,
            broker_url: non_empty("BROKER_URL"),
            queue_capacity: parse_or_default("QUEUE_CAPACITY", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            relay: RelayConfig {
                poll_interval: Duration::from_millis(parse_or_default("OUTBOX_POLL_MS", 500)?),
                batch_size: parse_or_default("OUTBOX_BATCH", 100)?,
                publish_timeout: Duration::from_millis(parse_or_default(
                    "PUBLISH_TIMEOUT_MS",
                    3_000,
                )?),
            },
            consume_timeout: Duration::from_millis(parse_or_default("CONSUME_TIMEOUT_MS", 10_000)?),
            pricing: PricingConfig {
                base_fee: parse_or_default("BASE_FEE", 50.0)?,
                distance_rate: parse_or_default("DISTANCE_RATE", 5.0)?,
                weight_rate: parse_or_default("WEIGHT_RATE", 2.0)?,
                volume_rate: parse_or_default("VOLUME_RATE", 3.0)?,
                urgency_factor: parse_or_default("URGENCY_FACTOR", 1.5)?,
                currency: env::var("CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            },
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::LogFormat;

    #[test]
    fn log_format_is_case_insensitive() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("pretty".parse::<LogFormat>().is_err());
    }
}
