//! Application-level configuration loading: retention limits, wizz throttle
//! policy and write strictness.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

use crate::state::wizz::WizzPolicy;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PLANNING_POKER_CONFIG_PATH";

const DEFAULT_RETENTION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_RETENTION_MAX_SESSIONS: usize = 200;
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Limits enforced by the retention sweep run before each session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Sessions created longer ago than this are deleted.
    pub max_age: Duration,
    /// Upper bound on stored sessions; the oldest go first.
    pub max_sessions: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_RETENTION_MAX_AGE,
            max_sessions: DEFAULT_RETENTION_MAX_SESSIONS,
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    retention: RetentionPolicy,
    wizz: WizzPolicy,
    strict_writes: bool,
    sse_keep_alive: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        strict_writes = app_config.strict_writes,
                        "loaded configuration"
                    );
                    app_config
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

    /// Parse a JSON document; omitted keys keep their defaults.
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Retention sweep limits.
    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Wizz throttle policy handed to each client's local controls.
    pub fn wizz(&self) -> WizzPolicy {
        self.wizz
    }

    /// Whether writes carry the observed version and fail on concurrent changes.
    pub fn strict_writes(&self) -> bool {
        self.strict_writes
    }

    /// Interval between SSE keep-alive comments.
    pub fn sse_keep_alive(&self) -> Duration {
        self.sse_keep_alive
    }

    /// Enable or disable version-checked writes.
    pub fn with_strict_writes(mut self, strict: bool) -> Self {
        self.strict_writes = strict;
        self
    }

    /// Replace the wizz policy.
    pub fn with_wizz(mut self, wizz: WizzPolicy) -> Self {
        self.wizz = wizz;
        self
    }

    /// Replace the retention limits.
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            wizz: WizzPolicy::default(),
            strict_writes: false,
            sse_keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    retention: RawRetention,
    wizz: RawWizz,
    strict_writes: bool,
    sse: RawSse,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawRetention {
    #[serde_as(as = "DurationSeconds<u64>")]
    max_age_secs: Duration,
    max_sessions: usize,
}

impl Default for RawRetention {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            max_age_secs: policy.max_age,
            max_sessions: policy.max_sessions,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawWizz {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    window_ms: Duration,
    max_clicks: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    cooldown_ms: Duration,
}

impl Default for RawWizz {
    fn default() -> Self {
        let policy = WizzPolicy::default();
        Self {
            window_ms: policy.window,
            max_clicks: policy.max_clicks,
            cooldown_ms: policy.cooldown,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSse {
    #[serde_as(as = "DurationSeconds<u64>")]
    keep_alive_secs: Duration,
}

impl Default for RawSse {
    fn default() -> Self {
        Self {
            keep_alive_secs: DEFAULT_KEEP_ALIVE,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            retention: RetentionPolicy {
                max_age: value.retention.max_age_secs,
                max_sessions: value.retention.max_sessions,
            },
            wizz: WizzPolicy {
                window: value.wizz.window_ms,
                max_clicks: value.wizz.max_clicks.max(1),
                cooldown: value.wizz.cooldown_ms,
            },
            strict_writes: value.strict_writes,
            sse_keep_alive: value.sse.keep_alive_secs,
        }
    }
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
    fn empty_document_keeps_defaults() {
        let config = AppConfig::parse("{}").unwrap();
        assert_eq!(config.retention(), RetentionPolicy::default());
        assert_eq!(config.wizz(), WizzPolicy::default());
        assert!(!config.strict_writes());
        assert_eq!(config.sse_keep_alive(), DEFAULT_KEEP_ALIVE);
    }

    #[test]
    fn partial_sections_override_only_named_keys() {
        let config = AppConfig::parse(
            r#"{
                "strictWrites": true,
                "retention": { "maxSessions": 10 },
                "wizz": { "cooldownMs": 1500 }
            }"#,
        )
        .unwrap();

        assert!(config.strict_writes());
        assert_eq!(config.retention().max_sessions, 10);
        assert_eq!(config.retention().max_age, DEFAULT_RETENTION_MAX_AGE);
        assert_eq!(config.wizz().cooldown, Duration::from_millis(1500));
        assert_eq!(config.wizz().window, Duration::from_secs(3));
    }

    #[test]
    fn malformed_durations_are_rejected() {
        assert!(AppConfig::parse(r#"{ "wizz": { "windowMs": "soon" } }"#).is_err());
    }
}
