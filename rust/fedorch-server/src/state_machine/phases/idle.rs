use async_trait::async_trait;
use tracing::{debug, info};

use crate::state_machine::{
    events::{MetricsUpdate, ModelUpdate},
    phases::{Discover, Phase, PhaseError, PhaseName, PhaseState, Shared},
    StateMachine,
};

/// The idle state.
#[derive(Debug)]
pub struct Idle;

#[async_trait]
impl Phase for PhaseState<Idle> {
    const NAME: PhaseName = PhaseName::Idle;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let task = &self.shared.state.task;
        info!(
            "starting the round of task {}: {} iterations of model {} version {} for use case {}",
            self.shared.round_id(),
            task.num_global_iterations,
            task.model_name,
            task.model_version,
            task.use_case,
        );
        Ok(())
    }

    fn broadcast(&mut self) {
        info!("broadcasting invalidation of the global model from the previous round");
        self.shared.events.broadcast_model(ModelUpdate::Invalidate);
        self.shared.events.broadcast_metrics(MetricsUpdate::Invalidate);
    }

    fn next(self) -> StateMachine {
        PhaseState::<Discover>::new(self.shared).into()
    }
}

impl PhaseState<Idle> {
    /// Creates a new idle state.
    pub fn new(shared: Shared) -> Self {
        debug!("new round ID = {}", shared.round_id());
        Self {
            private: Idle,
            shared,
        }
    }
}
