//! The state a node keeps between the stages of a round.

use std::fmt;

use fedorch_core::{
    learner::{Dataset, LocalLearner},
    tracking::RunScope,
};

use crate::settings::NodeSettings;

/// The name and version of the model a learner was created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMeta {
    pub name: String,
    pub version: i64,
}

/// The context of a node, handed to every stage handler.
///
/// Stages are performed one at a time, the session is never shared.
pub struct ClientSession {
    pub settings: NodeSettings,
    /// The data loaded by the latest `load_data` stage.
    pub data: Option<Dataset>,
    /// The learner created by the latest `load_model` stage.
    pub learner: Option<Box<dyn LocalLearner>>,
    pub model: Option<ModelMeta>,
    /// The tracking identifiers of the node, set between `set_run_config` and `clean_config`.
    pub scope: RunScope,
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("settings", &self.settings)
            .field("data", &self.data.as_ref().map(Dataset::len))
            .field("learner", &self.learner.is_some())
            .field("model", &self.model)
            .field("scope", &self.scope)
            .finish()
    }
}

impl ClientSession {
    pub fn new(settings: NodeSettings) -> Self {
        Self {
            settings,
            data: None,
            learner: None,
            model: None,
            scope: RunScope::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }
}
