use tracing::{error_span, info};
use tracing_futures::Instrument;

use fedorch_core::{
    records::{MetricsRecord, ParametersRecord},
    reply::UploadReceipt,
    NodeId,
};

use crate::state_machine::phases::{PhaseName, PhaseState, Shared};

/// The outcome of a completed round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    pub task_id: u64,
    /// The participating nodes.
    pub node_ids: Vec<NodeId>,
    /// The number of training iterations.
    pub iterations: u32,
    /// The metrics aggregated in the last training iteration, if there was one.
    pub metrics: Option<MetricsRecord>,
    /// The final global parameters.
    pub parameters: ParametersRecord,
    /// The registry identifiers of the uploaded model.
    pub upload: UploadReceipt,
}

/// The complete state.
#[derive(Debug)]
pub struct Complete {
    summary: RoundSummary,
}

impl PhaseState<Complete> {
    /// Creates a new complete state.
    pub fn new(shared: Shared, summary: RoundSummary) -> Self {
        Self {
            private: Complete { summary },
            shared,
        }
    }

    pub fn summary(&self) -> &RoundSummary {
        &self.private.summary
    }

    /// Ends the round and returns its outcome.
    pub async fn conclude(mut self) -> RoundSummary {
        let phase = PhaseName::Complete;
        let span = error_span!("run_phase", phase = %phase);

        async move {
            info!("starting phase");
            self.shared.events.broadcast_phase(phase);
            info!(
                "round of task {} completed after {} iterations with {} nodes",
                self.private.summary.task_id,
                self.private.summary.iterations,
                self.private.summary.node_ids.len(),
            );
            self.private.summary
        }
        .instrument(span)
        .await
    }
}
