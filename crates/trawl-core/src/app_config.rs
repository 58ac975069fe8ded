use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub topics_path: PathBuf,
    pub api_key: String,
    pub api_base_url: String,
    pub api_timeout_secs: u64,
    pub api_max_retries: u32,
    pub api_backoff_base_ms: u64,
    pub api_rate_limit_margin_ms: u64,
    pub api_max_rate_limit_waits: u32,
    pub collect_interval_secs: u64,
    pub inter_topic_delay_ms: u64,
    pub search_language: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub trigger_tokens: Vec<String>,
}

impl AppConfig {
    #[must_use]
    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs)
    }

    #[must_use]
    pub fn inter_topic_delay(&self) -> Duration {
        Duration::from_millis(self.inter_topic_delay_ms)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("topics_path", &self.topics_path)
            .field("database_url", &"[redacted]")
            .field("api_key", &"[redacted]")
            .field("api_base_url", &self.api_base_url)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("api_max_retries", &self.api_max_retries)
            .field("api_backoff_base_ms", &self.api_backoff_base_ms)
            .field("api_rate_limit_margin_ms", &self.api_rate_limit_margin_ms)
            .field("api_max_rate_limit_waits", &self.api_max_rate_limit_waits)
            .field("collect_interval_secs", &self.collect_interval_secs)
            .field("inter_topic_delay_ms", &self.inter_topic_delay_ms)
            .field("search_language", &self.search_language)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field(
                "trigger_tokens",
                &format_args!("[{} redacted]", self.trigger_tokens.len()),
            )
            .finish()
    }
}
