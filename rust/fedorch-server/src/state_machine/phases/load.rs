use async_trait::async_trait;
use tracing::info;

use crate::state_machine::{
    phases::{Phase, PhaseError, PhaseName, PhaseState, Seed, Shared},
    StateMachine,
};

/// The load state.
#[derive(Debug)]
pub struct Load;

#[async_trait]
impl Phase for PhaseState<Load> {
    const NAME: PhaseName = PhaseName::Load;

    /// Loads the aggregator of the model and makes the nodes load their data and their learner.
    async fn process(&mut self) -> Result<(), PhaseError> {
        let (model_name, model_version) = {
            let task = &self.shared.state.task;
            (task.model_name.clone(), task.model_version)
        };
        let use_case = self.shared.state.task.use_case.clone();

        info!("loading model {} version {}", model_name, model_version);
        let model = self
            .shared
            .registry
            .load_model(&model_name, model_version)
            .await?;
        self.shared.state.aggregator = Some(model.create_aggregator());

        let flow = &self.shared.flow;
        let node_ids = &self.shared.state.node_ids;
        flow.load_data(node_ids, &use_case).await?;
        flow.load_model(node_ids, &model_name, model_version).await?;
        flow.prepare_data(node_ids).await?;
        Ok(())
    }

    fn next(self) -> StateMachine {
        PhaseState::<Seed>::new(self.shared).into()
    }
}

impl PhaseState<Load> {
    /// Creates a new load state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Load,
            shared,
        }
    }
}
