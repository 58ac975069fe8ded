use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// The parsing/validation logic is decoupled from the process environment so it
/// can be tested with a plain `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let database_url = require("DATABASE_URL")?;
    let api_key = require("TRAWL_API_KEY")?;

    let env = parse_environment(&or_default("TRAWL_ENV", "development"));
    let bind_addr = parse_addr("TRAWL_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("TRAWL_LOG_LEVEL", "info");
    let topics_path = PathBuf::from(or_default("TRAWL_TOPICS_PATH", "./config/topics.yaml"));

    let api_base_url = or_default("TRAWL_API_BASE_URL", "https://api.twitterapi.io");
    let api_timeout_secs = parse_u64("TRAWL_API_TIMEOUT_SECS", "30")?;
    let api_max_retries = parse_u32("TRAWL_API_MAX_RETRIES", "3")?;
    let api_backoff_base_ms = parse_u64("TRAWL_API_BACKOFF_BASE_MS", "1000")?;
    let api_rate_limit_margin_ms = parse_u64("TRAWL_API_RATE_LIMIT_MARGIN_MS", "1000")?;
    let api_max_rate_limit_waits = parse_u32("TRAWL_API_MAX_RATE_LIMIT_WAITS", "5")?;

    let collect_interval_secs = parse_u64("TRAWL_COLLECT_INTERVAL_SECS", "3600")?;
    if collect_interval_secs == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "TRAWL_COLLECT_INTERVAL_SECS".to_string(),
            reason: "interval must be greater than zero".to_string(),
        });
    }
    let inter_topic_delay_ms = parse_u64("TRAWL_INTER_TOPIC_DELAY_MS", "1000")?;
    let search_language = lookup("TRAWL_SEARCH_LANGUAGE")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let db_max_connections = parse_u32("TRAWL_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("TRAWL_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("TRAWL_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let trigger_tokens = or_default("TRAWL_TRIGGER_TOKENS", "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect();

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        topics_path,
        api_key,
        api_base_url,
        api_timeout_secs,
        api_max_retries,
        api_backoff_base_ms,
        api_rate_limit_margin_ms,
        api_max_rate_limit_waits,
        collect_interval_secs,
        inter_topic_delay_ms,
        search_language,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        trigger_tokens,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
