use async_trait::async_trait;
use tracing::info;

use fedorch_core::NodeId;

use crate::state_machine::{
    phases::{Filter, Phase, PhaseError, PhaseName, PhaseState, Shared},
    StateMachine,
};

/// The discover state.
#[derive(Debug)]
pub struct Discover {
    /// The nodes currently connected to the fabric.
    node_ids: Vec<NodeId>,
}

#[async_trait]
impl Phase for PhaseState<Discover> {
    const NAME: PhaseName = PhaseName::Discover;

    async fn process(&mut self) -> Result<(), PhaseError> {
        self.private.node_ids = self.shared.flow.node_ids().await?;
        info!("{} nodes are connected", self.private.node_ids.len());
        Ok(())
    }

    fn next(self) -> StateMachine {
        PhaseState::<Filter>::new(self.shared, self.private.node_ids).into()
    }
}

impl PhaseState<Discover> {
    /// Creates a new discover state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Discover {
                node_ids: Vec::new(),
            },
            shared,
        }
    }
}
