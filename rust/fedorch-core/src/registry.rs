//! The model registry.
//!
//! The registry holds versioned [`FlModel`]s. A model knows how to create the learner a node
//! trains and the aggregator the coordinator combines the results with. How models are stored
//! and instantiated is up to the registry implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{aggregation::Aggregator, learner::LocalLearner, tracking::RunConfig};

/// A model definition stored in the registry.
pub trait FlModel: Send + Sync {
    /// Creates a fresh learner with initial parameters.
    fn create_learner(&self) -> Box<dyn LocalLearner>;

    /// Creates the aggregator for the results of the learners.
    fn create_aggregator(&self) -> Box<dyn Aggregator>;
}

/// The registry identifiers of an uploaded model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub version: i64,
    pub model_id: String,
    pub run_id: String,
    pub uri: String,
}

/// Errors of a [`ModelRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("model {name} version {version} does not exist")]
    NotFound { name: String, version: i64 },

    #[error("registry backend failed: {0}")]
    Backend(#[from] anyhow::Error),
}

/// The model registry service.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Loads a model definition.
    async fn load_model(&self, name: &str, version: i64) -> Result<Arc<dyn FlModel>, RegistryError>;

    /// Stores the final state of a learner as a new model version, named
    /// `trained_<model name>` and attached to the parent run of the round.
    async fn upload_final_state(
        &self,
        run: &RunConfig,
        learner: &dyn LocalLearner,
    ) -> Result<ModelInfo, RegistryError>;
}

/// Gets the registry name of the trained version of a model.
pub fn trained_model_name(model_name: &str) -> String {
    format!("trained_{}", model_name)
}
