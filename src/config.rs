//! Application-level configuration loading: lock timings and the poll timeout.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

use crate::lock::{
    DEFAULT_LEASE_DURATION, DEFAULT_RENEW_INTERVAL, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_INTERVAL, LockSettings, RetryPolicy,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CARDS_PARTY_BACK_CONFIG_PATH";
/// Container holding the lock placeholder objects.
pub const DEFAULT_LOCK_CONTAINER: &str = "locks";
/// Longest a poll request stays parked.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);
/// Shortest lease accepted from the configuration file.
pub const MIN_LEASE_DURATION: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Container holding the lock placeholder objects.
    pub lock_container: String,
    /// Lease and retry timings handed to the mutex.
    pub lock: LockSettings,
    /// Longest a poll request waits for a change.
    pub poll_timeout: Duration,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        container = %config.lock_container,
                        retry = config.lock.retry.is_some(),
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

    fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawConfig {
    lock_container: String,
    with_retry: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    retry_interval_ms: Duration,
    retry_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    lease_duration_ms: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    renew_interval_ms: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    poll_timeout_ms: Duration,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            lock_container: DEFAULT_LOCK_CONTAINER.into(),
            with_retry: false,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            lease_duration_ms: DEFAULT_LEASE_DURATION,
            renew_interval_ms: DEFAULT_RENEW_INTERVAL,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let mut lease_duration = value.lease_duration_ms;
        if lease_duration < MIN_LEASE_DURATION {
            warn!(
                lease_ms = lease_duration.as_millis() as u64,
                min_ms = MIN_LEASE_DURATION.as_millis() as u64,
                "lease duration too short; using the default"
            );
            lease_duration = DEFAULT_LEASE_DURATION;
        }

        let mut renew_interval = value.renew_interval_ms;
        if renew_interval.is_zero() || renew_interval >= lease_duration {
            renew_interval = lease_duration / 3;
            warn!(
                lease_ms = lease_duration.as_millis() as u64,
                renew_ms = renew_interval.as_millis() as u64,
                "renew interval must be shorter than the lease; using a third of it"
            );
        }

        let retry = value.with_retry.then(|| RetryPolicy {
            interval: value.retry_interval_ms,
            attempts: value.retry_attempts.max(1),
        });

        Self {
            lock_container: value.lock_container,
            lock: LockSettings {
                lease_duration,
                renew_interval,
                retry,
            },
            poll_timeout: value.poll_timeout_ms,
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
