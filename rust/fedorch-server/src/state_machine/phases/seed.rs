use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use fedorch_core::records::ParametersRecord;

use crate::state_machine::{
    events::ModelUpdate,
    phases::{Finalize, Phase, PhaseError, PhaseName, PhaseState, Shared, Train},
    StateMachine,
};

/// The seed state.
#[derive(Debug)]
pub struct Seed {
    /// The initial global parameters.
    parameters: ParametersRecord,
}

#[async_trait]
impl Phase for PhaseState<Seed> {
    const NAME: PhaseName = PhaseName::Seed;

    /// Takes the initial parameters of one node and sets them on every node.
    async fn process(&mut self) -> Result<(), PhaseError> {
        let flow = &self.shared.flow;
        let node_ids = &self.shared.state.node_ids;
        let parameters = flow.get_parameters_from_one_node(node_ids).await?;
        flow.set_parameters(node_ids, parameters.clone()).await?;
        self.private.parameters = parameters;
        Ok(())
    }

    fn broadcast(&mut self) {
        info!("broadcasting the initial global model");
        self.shared
            .events
            .broadcast_model(ModelUpdate::New(Arc::new(self.private.parameters.clone())));
    }

    fn next(self) -> StateMachine {
        let parameters = self.private.parameters;
        if self.shared.state.task.num_global_iterations == 0 {
            info!("no training iterations requested");
            PhaseState::<Finalize>::new(self.shared, parameters).into()
        } else {
            PhaseState::<Train>::new(self.shared, 0, parameters).into()
        }
    }
}

impl PhaseState<Seed> {
    /// Creates a new seed state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Seed {
                parameters: ParametersRecord::new(),
            },
            shared,
        }
    }
}
