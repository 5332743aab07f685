//! Engine configuration, from defaults or `ODBC_ENGINE_*` environment
//! variables.

use crate::error::{OdbcError, Result};
use serde::Deserialize;

pub const MAX_WORKERS_ENV: &str = "ODBC_ENGINE_MAX_WORKERS";
pub const CONNECT_TIMEOUT_ENV: &str = "ODBC_ENGINE_CONNECT_TIMEOUT";
pub const LOGIN_TIMEOUT_ENV: &str = "ODBC_ENGINE_LOGIN_TIMEOUT";
pub const LOG_QUERIES_ENV: &str = "ODBC_ENGINE_LOG_QUERIES";

const DEFAULT_MAX_WORKERS: usize = 512;
const DEFAULT_CONNECT_TIMEOUT_SECS: u32 = 0;
const DEFAULT_LOGIN_TIMEOUT_SECS: u32 = 5;

/// Per-connection timeouts applied at open. Zero leaves the driver default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub connect_timeout_secs: u32,
    pub login_timeout_secs: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            login_timeout_secs: DEFAULT_LOGIN_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on blocking worker threads.
    pub max_workers: usize,
    pub connection: ConnectionOptions,
    pub log_queries: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            connection: ConnectionOptions::default(),
            log_queries: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| OdbcError::ValidationError(format!("Invalid engine config: {}", e)))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup(MAX_WORKERS_ENV) {
            config.max_workers = parse_number(MAX_WORKERS_ENV, &v)?;
            if config.max_workers == 0 {
                return Err(OdbcError::ValidationError(format!(
                    "{} must be greater than zero",
                    MAX_WORKERS_ENV
                )));
            }
        }
        if let Some(v) = lookup(CONNECT_TIMEOUT_ENV) {
            config.connection.connect_timeout_secs = parse_number(CONNECT_TIMEOUT_ENV, &v)?;
        }
        if let Some(v) = lookup(LOGIN_TIMEOUT_ENV) {
            config.connection.login_timeout_secs = parse_number(LOGIN_TIMEOUT_ENV, &v)?;
        }
        if let Some(v) = lookup(LOG_QUERIES_ENV) {
            config.log_queries = parse_bool_flag(&v).ok_or_else(|| {
                OdbcError::ValidationError(format!("{} must be a boolean flag, got '{}'", LOG_QUERIES_ENV, v))
            })?;
        }
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        OdbcError::ValidationError(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}

pub(crate) fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
