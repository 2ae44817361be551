//! Controller configuration, read from environment variables.

use crate::error::ControllerError;
use std::time::Duration;

/// Interval between drift checks of a healthy tenant
const RESYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch, all namespaces when `None` (`WATCH_NAMESPACE`)
    pub namespace: Option<String>,
    /// Datastore connect timeout (`DATASTORE_CONNECT_TIMEOUT_SECS`, default 10)
    pub datastore_connect_timeout: Duration,
    /// Backoff lower bound in minutes (`REQUEUE_MIN_MINUTES`, default 1)
    pub requeue_min_minutes: u64,
    /// Backoff upper bound in minutes (`REQUEUE_MAX_MINUTES`, default 10)
    pub requeue_max_minutes: u64,
    pub resync_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            datastore_connect_timeout: Duration::from_secs(10),
            requeue_min_minutes: 1,
            requeue_max_minutes: 10,
            resync_interval: RESYNC_INTERVAL,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str, default: u64| -> Result<u64, ControllerError> {
            match lookup(key) {
                Some(value) => value.trim().parse().map_err(|e| {
                    ControllerError::InvalidConfig(format!("{key}={value} is not a valid number: {e}"))
                }),
                None => Ok(default),
            }
        };

        let config = Self {
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            datastore_connect_timeout: Duration::from_secs(number(
                "DATASTORE_CONNECT_TIMEOUT_SECS",
                defaults.datastore_connect_timeout.as_secs(),
            )?),
            requeue_min_minutes: number("REQUEUE_MIN_MINUTES", defaults.requeue_min_minutes)?,
            requeue_max_minutes: number("REQUEUE_MAX_MINUTES", defaults.requeue_max_minutes)?,
            resync_interval: defaults.resync_interval,
        };

        if config.requeue_min_minutes == 0 || config.requeue_max_minutes < config.requeue_min_minutes {
            return Err(ControllerError::InvalidConfig(format!(
                "requeue bounds {}..{} minutes are invalid",
                config.requeue_min_minutes, config.requeue_max_minutes
            )));
        }
        Ok(config)
    }
}
