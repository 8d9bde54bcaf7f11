//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables prefixed
//! with `FEDORCH`, nested keys are separated by `__`. An example configuration file can be found
//! in the `configs/` directory located in the repository root.

#[cfg(test)]
mod tests;

use std::{fmt, path::Path, time::Duration};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationErrors};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    pub log: LoggingSettings,
    #[serde(default)]
    #[validate]
    pub driver: DriverSettings,
    #[serde(default)]
    #[validate]
    pub round: RoundSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = load(path)?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Loads a settings section from a configuration file and the environment.
///
/// Sections which are not part of `T` are ignored, which lets binaries with additional sections
/// share the configuration file of the coordinator.
pub fn load<T>(path: impl AsRef<Path>) -> Result<T, ConfigError>
where
    for<'de> T: Deserialize<'de>,
{
    let mut config = Config::new();
    config.merge(config::File::from(path.as_ref()))?;
    config.merge(Environment::with_prefix("fedorch").separator("__"))?;
    config.try_into()
}

#[derive(Debug, Validate, Deserialize, Clone, Copy, PartialEq)]
/// Transport driver settings.
pub struct DriverSettings {
    /// The delay between two polls for replies, in milliseconds.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [driver]
    /// poll_interval_ms = 3000
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDORCH_DRIVER__POLL_INTERVAL_MS=3000
    /// ```
    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,

    /// The time-to-live of the requests, in seconds.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [driver]
    /// ttl_secs = 3600
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDORCH_DRIVER__TTL_SECS=3600
    /// ```
    #[serde(default = "default_ttl_secs")]
    #[validate(range(min = 1))]
    pub ttl_secs: u64,

    /// The maximal amount of time a barrier waits for all replies, in seconds. If unset, a
    /// barrier waits until every reply has arrived.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [driver]
    /// barrier_timeout_secs = 600
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDORCH_DRIVER__BARRIER_TIMEOUT_SECS=600
    /// ```
    #[serde(default)]
    #[validate(range(min = 1))]
    pub barrier_timeout_secs: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            ttl_secs: default_ttl_secs(),
            barrier_timeout_secs: None,
        }
    }
}

impl DriverSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Validate, Deserialize, Clone, Copy, PartialEq, Eq)]
/// Round settings.
pub struct RoundSettings {
    /// Whether a stage whose success is checked aborts the round if a node failed. If disabled,
    /// failures are logged and the round goes on with the replies of the successful nodes.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// abort_on_failure = true
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDORCH_ROUND__ABORT_ON_FAILURE=true
    /// ```
    #[serde(default = "default_abort_on_failure")]
    pub abort_on_failure: bool,

    /// The minimal number of participating nodes. A round with fewer nodes left after filtering
    /// is aborted.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// min_nodes = 1
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDORCH_ROUND__MIN_NODES=1
    /// ```
    #[serde(default = "default_min_nodes")]
    #[validate(range(min = 1))]
    pub min_nodes: usize,
}

fn default_abort_on_failure() -> bool {
    true
}

fn default_min_nodes() -> usize {
    1
}

impl Default for RoundSettings {
    fn default() -> Self {
        Self {
            abort_on_failure: default_abort_on_failure(),
            min_nodes: default_min_nodes(),
        }
    }
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDORCH_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.2.17/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.2.17/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
