use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::modules::directory::application::services::BackendTimeouts;

pub const MAX_CACHE_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Tuning of the directory's view of its backends.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryConfig {
    pub cache_ttl: Duration,
    pub timeouts: BackendTimeouts,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            timeouts: BackendTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub directory: DirectoryConfig,
}

impl AppConfig {
    /// Loads `.env.{RUST_ENV}` (falling back to `.env`) and reads the process
    /// environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "development".to_string());
        if dotenvy::from_filename(format!(".env.{env_name}")).is_err() {
            dotenvy::dotenv().ok();
        }

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let database_url = required("DATABASE_URL")?;
        let redis_url = required("REDIS_URL")?;

        let db_max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", 50u32)?;
        let db_min_connections = parse_or(&lookup, "DB_MIN_CONNECTIONS", 5u32)?;
        if db_min_connections > db_max_connections {
            return Err(ConfigError::Invalid {
                name: "DB_MIN_CONNECTIONS",
                value: db_min_connections.to_string(),
                reason: format!("must not exceed DB_MAX_CONNECTIONS ({db_max_connections})"),
            });
        }

        let cache_ttl_secs = parse_or(&lookup, "DIRECTORY_CACHE_TTL_SECS", 300u64)?;
        if cache_ttl_secs == 0 || cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigError::Invalid {
                name: "DIRECTORY_CACHE_TTL_SECS",
                value: cache_ttl_secs.to_string(),
                reason: format!("must be between 1 and {MAX_CACHE_TTL_SECS}"),
            });
        }

        let timeouts = BackendTimeouts {
            store: millis(&lookup, "DIRECTORY_STORE_TIMEOUT_MS", 2000)?,
            cache: millis(&lookup, "DIRECTORY_CACHE_TIMEOUT_MS", 250)?,
            sessions: millis(&lookup, "DIRECTORY_SESSION_TIMEOUT_MS", 250)?,
        };

        Ok(Self {
            database_url,
            redis_url,
            db_max_connections,
            db_min_connections,
            directory: DirectoryConfig {
                cache_ttl: Duration::from_secs(cache_ttl_secs),
                timeouts,
            },
        })
    }

    /// Convenience for tests and tooling that already hold the variables.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| vars.get(name).cloned())
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn millis<F>(lookup: &F, name: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, name, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_millis(value))
}
