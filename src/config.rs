//! Runtime settings resolved from the environment.
//!
//! Every value has a default, so an empty environment yields a working
//! recorder for the TTC feed writing to `./db/recordings.db`.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::recorder::{CursorPolicy, DEFAULT_POLL_INTERVAL, RecorderSettings};

pub const DEFAULT_FEED_URL: &str = "https://webservices.umoiq.com/service/publicJSONFeed";
pub const DEFAULT_AGENCY: &str = "ttc";
pub const DEFAULT_DATABASE_PATH: &str = "./db/recordings.db";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("{var} must be a positive number of seconds, got {value:?}")]
    InvalidSeconds { var: &'static str, value: String },

    #[error("{var}: {message}")]
    Invalid { var: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub feed_url: Url,
    pub agency: String,
    pub database_path: PathBuf,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub cursor_policy: CursorPolicy,
}

impl Config {
    /// Reads the process environment (call `dotenvy::dotenv()` first to pick
    /// up a `.env` file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let feed_url = lookup("TRANSIT_FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string());
        let mut config = Config {
            feed_url: Url::parse(&feed_url).map_err(|source| ConfigError::InvalidUrl {
                var: "TRANSIT_FEED_URL",
                source,
            })?,
            agency: DEFAULT_AGENCY.to_string(),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cursor_policy: CursorPolicy::default(),
        };

        if let Some(value) = lookup("TRANSIT_AGENCY") {
            config.agency = value;
        }
        if let Some(value) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("POLL_INTERVAL_SECS") {
            config.poll_interval = parse_seconds("POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("REQUEST_TIMEOUT_SECS") {
            config.request_timeout = parse_seconds("REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("CURSOR_POLICY") {
            config.cursor_policy = value.parse().map_err(|message| ConfigError::Invalid {
                var: "CURSOR_POLICY",
                message,
            })?;
        }

        Ok(config)
    }

    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            poll_interval: self.poll_interval,
            cursor_policy: self.cursor_policy,
        }
    }
}

fn parse_seconds(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidSeconds {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.feed_url.as_str(), DEFAULT_FEED_URL);
        assert_eq!(config.database_path, PathBuf::from("./db/recordings.db"));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.agency, "ttc");
        assert_eq!(config.cursor_policy, CursorPolicy::RequireDecode);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("TRANSIT_FEED_URL", "http://localhost:8080/feed"),
            ("TRANSIT_AGENCY", "sf-muni"),
            ("DATABASE_PATH", "/tmp/r.db"),
            ("POLL_INTERVAL_SECS", "5"),
            ("REQUEST_TIMEOUT_SECS", "2"),
            ("CURSOR_POLICY", "advance-on-decode-error"),
        ]))
        .unwrap();

        assert_eq!(config.feed_url.as_str(), "http://localhost:8080/feed");
        assert_eq!(config.agency, "sf-muni");
        assert_eq!(config.database_path, PathBuf::from("/tmp/r.db"));
        assert_eq!(config.recorder_settings().poll_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.cursor_policy, CursorPolicy::AdvanceOnDecodeError);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("POLL_INTERVAL_SECS", "0")])),
            Err(ConfigError::InvalidSeconds { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("REQUEST_TIMEOUT_SECS", "soon")])),
            Err(ConfigError::InvalidSeconds { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("TRANSIT_FEED_URL", "not a url")])),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("CURSOR_POLICY", "yolo")])),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
