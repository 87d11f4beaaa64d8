//! Configuration module for the vehicle inventory service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default capacity of the store change feed.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite document store file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Number of buffered change events before slow subscribers start lagging
    pub event_capacity: usize,
}

/// A configuration value that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {} value: {:?}", self.key, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("VEHICLES_API_PSK").ok().filter(|s| !s.is_empty());

        let db_path = env::var("VEHICLES_DB_PATH")
            .unwrap_or_else(|_| "./data/vehicles.sqlite".to_string())
            .into();

        let bind_addr = parse_var("VEHICLES_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = env::var("VEHICLES_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let event_capacity: usize =
            parse_var("VEHICLES_EVENT_CAPACITY", &DEFAULT_EVENT_CAPACITY.to_string())?;
        if event_capacity == 0 {
            return Err(ConfigError {
                key: "VEHICLES_EVENT_CAPACITY",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            event_capacity,
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|_| ConfigError { key, value })
}
