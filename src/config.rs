//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How often the poll loop ticks.
    pub poll_interval: Duration,
    /// Finalized jobs idle for longer than this are evicted from memory.
    pub retention: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retention: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl TrackerConfig {
    /// Read overrides from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let poll_interval = env_u64("ASK_TRACKER_POLL_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let retention = env_u64("ASK_TRACKER_RETENTION_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.retention);

        Self {
            poll_interval,
            retention,
        }
    }
}

/// AI service connection settings.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL, e.g. `http://localhost:5555`.
    pub base_url: String,
    /// Optional bearer token.
    pub api_token: Option<SecretString>,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("ASK_TRACKER_AI_SERVICE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("ASK_TRACKER_AI_SERVICE_URL".to_string()))?;

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "ASK_TRACKER_AI_SERVICE_URL".to_string(),
                message: format!("expected an http(s) URL, got {base_url}"),
            });
        }

        let api_token = std::env::var("ASK_TRACKER_AI_SERVICE_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }
}

/// Database location, `ASK_TRACKER_DB_PATH` or `./data/ask-tracker.db`.
pub fn db_path_from_env() -> PathBuf {
    std::env::var("ASK_TRACKER_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data/ask-tracker.db"))
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable setting: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TrackerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.retention, Duration::from_secs(300));
    }

    #[test]
    fn remote_config_new_has_no_token() {
        let config = RemoteConfig::new("http://localhost:5555");
        assert_eq!(config.base_url, "http://localhost:5555");
        assert!(config.api_token.is_none());
    }
}
