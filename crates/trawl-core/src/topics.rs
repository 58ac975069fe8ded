use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

const DEFAULT_PRIORITY: i32 = 5;
const DEFAULT_DAILY_QUOTA: i32 = 1000;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_daily_quota() -> i32 {
    DEFAULT_DAILY_QUOTA
}

fn default_active() -> bool {
    true
}

/// One tracked search query as declared in `topics.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub text: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_daily_quota")]
    pub daily_quota: i32,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopicsFile {
    pub topics: Vec<TopicConfig>,
}

/// Load and validate the topic seed file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_topics(path: &Path) -> Result<TopicsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::TopicsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_topics(&content)
}

fn parse_topics(content: &str) -> Result<TopicsFile, ConfigError> {
    let topics_file: TopicsFile = serde_yaml::from_str(content)?;
    validate_topics(&topics_file)?;
    Ok(topics_file)
}

fn validate_topics(topics_file: &TopicsFile) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for topic in &topics_file.topics {
        let text = topic.text.trim();
        if text.is_empty() {
            return Err(ConfigError::Validation(
                "topic text must be non-empty".to_string(),
            ));
        }

        if topic.daily_quota < 1 {
            return Err(ConfigError::Validation(format!(
                "topic '{text}' has invalid daily_quota {}; must be at least 1",
                topic.daily_quota
            )));
        }

        if !seen.insert(text.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate topic: '{text}'"
            )));
        }
    }

    Ok(())
}
