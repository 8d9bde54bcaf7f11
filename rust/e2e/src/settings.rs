//! Settings of the in-process simulation.
//!
//! The `[simulation]` section lives in the configuration file of the coordinator, next to the
//! `[log]`, `[driver]` and `[round]` sections.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use validator::{Validate, ValidationError};

use fedorch_client::settings::NodeSettings;
use fedorch_server::settings::{load, SettingsError};

/// The use case served by nodes which don't take part in the simulated round.
pub const NON_PARTICIPATING_USE_CASE: &str = "mnist";

#[derive(Debug, Validate, Deserialize)]
struct SimulationSection {
    #[validate]
    simulation: SimulationSettings,
}

#[derive(Debug, Validate, Deserialize, Clone, PartialEq, Eq)]
#[validate(schema(function = "validate_simulation"))]
/// Simulation settings.
pub struct SimulationSettings {
    /// The number of nodes connected to the fabric.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [simulation]
    /// nodes = 3
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDORCH_SIMULATION__NODES=3
    /// ```
    #[validate(range(min = 1))]
    pub nodes: usize,
    /// The number of nodes serving another use case than the task. They are filtered out.
    pub non_participating: usize,
    /// The CSV file every node loads its data from.
    pub data_path: PathBuf,
    /// The JSON file of the task to run.
    pub task_path: PathBuf,
}

impl SimulationSettings {
    /// Loads and validates the `[simulation]` section of a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let section: SimulationSection = load(path)?;
        section.validate()?;
        Ok(section.simulation)
    }

    /// Gets the settings of the simulated nodes, the non participating ones last.
    pub fn node_settings(&self) -> Vec<NodeSettings> {
        (1..=self.nodes)
            .map(|i| {
                let mut settings = NodeSettings::new(format!("node-{}", i), self.data_path.clone());
                if i > self.nodes.saturating_sub(self.non_participating) {
                    settings.use_case = NON_PARTICIPATING_USE_CASE.to_string();
                }
                settings
            })
            .collect()
    }
}

fn validate_simulation(s: &SimulationSettings) -> Result<(), ValidationError> {
    if s.non_participating < s.nodes {
        Ok(())
    } else {
        Err(ValidationError::new(
            "at least one node must take part in the round",
        ))
    }
}
