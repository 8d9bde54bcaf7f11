//! Loading and validation of the settings of a node.
//!
//! Values defined in the configuration file can be overridden by environment variables prefixed
//! with `FEDORCH`, nested keys are separated by `__`.

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use thiserror::Error;
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
/// The settings of a node.
///
/// Sections of the configuration file other than `[node]` are ignored.
pub struct ClientSettings {
    #[validate]
    pub node: NodeSettings,
}

impl ClientSettings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("fedorch").separator("__"))?;
        let settings: ClientSettings = config.try_into()?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Validate, Deserialize, Clone, PartialEq, Eq)]
/// Node settings.
pub struct NodeSettings {
    /// The name of the node. It names the tracking run of the node and the source of its data.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [node]
    /// name = "node-1"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDORCH_NODE__NAME=node-1
    /// ```
    #[validate(length(min = 1))]
    pub name: String,

    /// The use case the node serves. The node takes part in the rounds of this use case only.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [node]
    /// use_case = "iris"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDORCH_NODE__USE_CASE=iris
    /// ```
    #[serde(default = "default_use_case")]
    #[validate(length(min = 1))]
    pub use_case: String,

    /// The path of the CSV file holding the local data.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [node]
    /// data_path = "data/iris.csv"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDORCH_NODE__DATA_PATH=data/iris.csv
    /// ```
    pub data_path: PathBuf,
}

fn default_use_case() -> String {
    "iris".to_string()
}

impl NodeSettings {
    /// Creates the settings of a node serving the default use case.
    pub fn new(name: impl Into<String>, data_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            use_case: default_use_case(),
            data_path: data_path.into(),
        }
    }
}
