//! Runtime configuration of a participant: timer cadence, retry knobs and
//! external service endpoints.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use thiserror::Error;
use tracing::{info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::services::retry::RetryPolicy;

/// Default location on disk where the runner looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ROUND_SYNC_CONFIG_PATH";

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_LETTER_RETRY_ATTEMPTS: u32 = 10;
const DEFAULT_LETTER_RETRY_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_FINAL_ROUND_GRACE: Duration = Duration::from_secs(3);
const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_JUDGE_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_HINT_TIMEOUT: Duration = Duration::from_secs(8);

/// Error raised when a configuration document cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config failed validation: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// Location and deadline of an external HTTP service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Base URL; `None` leaves the service unconfigured.
    pub url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the participant.
pub struct AppConfig {
    /// Cadence of the countdown recomputation.
    pub tick_interval: Duration,
    /// Cadence of the fallback state poll.
    pub poll_interval: Duration,
    /// Bounded retry used by followers waiting for the host's letter.
    pub letter_retry: RetryPolicy,
    /// Pause after scoring the final round before the game is closed.
    pub final_round_grace: Duration,
    /// Upper bound for the store writes of a phase transition.
    pub transition_timeout: Option<Duration>,
    pub judge: EndpointConfig,
    pub hint: EndpointConfig,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        tick_ms = config.tick_interval.as_millis() as u64,
                        judge = config.judge.url.as_deref().unwrap_or("-"),
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(contents)?;
        raw.validate()?;
        Ok(raw.into())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Validate)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "tick_interval_ms")]
    #[validate(custom(function = "non_zero"))]
    tick_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_ms")]
    #[validate(custom(function = "non_zero"))]
    poll_interval: Duration,
    #[validate(range(min = 1, max = 100))]
    letter_retry_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "letter_retry_delay_ms")]
    letter_retry_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "final_round_grace_ms")]
    final_round_grace: Duration,
    /// `0` disables the timeout.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "transition_timeout_ms")]
    transition_timeout: Duration,
    #[validate(nested)]
    judge: RawEndpoint,
    #[validate(nested)]
    hint: RawEndpoint,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            letter_retry_attempts: DEFAULT_LETTER_RETRY_ATTEMPTS,
            letter_retry_delay: DEFAULT_LETTER_RETRY_DELAY,
            final_round_grace: DEFAULT_FINAL_ROUND_GRACE,
            transition_timeout: DEFAULT_TRANSITION_TIMEOUT,
            judge: RawEndpoint::with_timeout(DEFAULT_JUDGE_TIMEOUT),
            hint: RawEndpoint::with_timeout(DEFAULT_HINT_TIMEOUT),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Validate)]
/// JSON representation of an external service entry.
struct RawEndpoint {
    #[serde(default)]
    #[validate(url)]
    url: Option<String>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms")]
    #[validate(custom(function = "non_zero"))]
    timeout: Duration,
}

impl RawEndpoint {
    fn with_timeout(timeout: Duration) -> Self {
        Self { url: None, timeout }
    }
}

impl From<RawEndpoint> for EndpointConfig {
    fn from(value: RawEndpoint) -> Self {
        Self {
            url: value.url,
            timeout: value.timeout,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            tick_interval: value.tick_interval,
            poll_interval: value.poll_interval,
            letter_retry: RetryPolicy::new(value.letter_retry_attempts, value.letter_retry_delay),
            final_round_grace: value.final_round_grace,
            transition_timeout: Some(value.transition_timeout).filter(|limit| !limit.is_zero()),
            judge: value.judge.into(),
            hint: value.hint.into(),
        }
    }
}

fn non_zero(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    Ok(())
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.transition_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn durations_are_read_in_milliseconds() {
        let config = AppConfig::from_json(
            r#"{
                "tick_interval_ms": 100,
                "letter_retry_attempts": 4,
                "letter_retry_delay_ms": 50,
                "transition_timeout_ms": 0,
                "judge": {"url": "http://judge.local/score", "timeout_ms": 1500}
            }"#,
        )
        .unwrap();

        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.letter_retry.max_attempts, 4);
        assert_eq!(config.letter_retry.delay, Duration::from_millis(50));
        assert_eq!(config.transition_timeout, None);
        assert_eq!(config.judge.url.as_deref(), Some("http://judge.local/score"));
        assert_eq!(config.judge.timeout, Duration::from_millis(1500));
        assert_eq!(config.hint.url, None);
    }

    #[test]
    fn zero_tick_is_rejected() {
        let err = AppConfig::from_json(r#"{"tick_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_url_is_rejected() {
        let raw = r#"{"hint": {"url": "not a url", "timeout_ms": 10}}"#;
        let err = AppConfig::from_json(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
