use async_trait::async_trait;
use tracing::{debug, info};

use fedorch_core::NodeId;

use crate::state_machine::{
    phases::{Configure, Phase, PhaseError, PhaseName, PhaseState, Shared},
    StateMachine,
};

/// The filter state.
#[derive(Debug)]
pub struct Filter {
    /// The discovered nodes.
    candidates: Vec<NodeId>,
}

#[async_trait]
impl Phase for PhaseState<Filter> {
    const NAME: PhaseName = PhaseName::Filter;

    /// Keeps the nodes which serve the use case of the task.
    ///
    /// The participants are kept in the order they replied.
    async fn process(&mut self) -> Result<(), PhaseError> {
        let state = &self.shared.state;
        let participants = self
            .shared
            .flow
            .filter_clients(&self.private.candidates, &state.task.use_case)
            .await?;
        debug!("participants: {:?}", participants);
        info!(
            "{} of {} nodes serve use case {}",
            participants.len(),
            self.private.candidates.len(),
            state.task.use_case,
        );

        let required = state.settings.min_nodes;
        if participants.len() < required {
            return Err(PhaseError::NotEnoughNodes {
                found: participants.len(),
                required,
            });
        }
        self.shared.state.node_ids = participants;
        Ok(())
    }

    fn next(self) -> StateMachine {
        PhaseState::<Configure>::new(self.shared).into()
    }
}

impl PhaseState<Filter> {
    /// Creates a new filter state.
    pub fn new(shared: Shared, candidates: Vec<NodeId>) -> Self {
        Self {
            private: Filter { candidates },
            shared,
        }
    }
}
