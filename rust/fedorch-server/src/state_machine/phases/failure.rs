use thiserror::Error;
use tracing::{error, error_span, info, warn};
use tracing_futures::Instrument;

use fedorch_core::{
    aggregation::AggregationError,
    registry::RegistryError,
    tracking::{finish_runs, RunScopeError, TrackingError},
};

use crate::{
    flow::FlowError,
    state_machine::{
        events::{MetricsUpdate, ModelUpdate},
        phases::{PhaseName, PhaseState, Shared},
    },
};

/// Errors which can occur during the execution of the [`StateMachine`].
///
/// [`StateMachine`]: crate::state_machine::StateMachine
#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("barrier failed: {0}")]
    Flow(#[from] FlowError),
    #[error("tracking failed: {0}")]
    Tracking(#[from] TrackingError),
    #[error("model registry failed: {0}")]
    Registry(#[from] RegistryError),
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),
    #[error("run configuration failed: {0}")]
    Scope(#[from] RunScopeError),
    #[error("{found} nodes take part in the round, but at least {required} are required")]
    NotEnoughNodes { found: usize, required: usize },
    #[error("no aggregator has been loaded")]
    NoAggregator,
    #[error("the final model has not been uploaded")]
    NoUpload,
}

/// The failure state.
#[derive(Debug)]
pub struct Failure {
    error: PhaseError,
}

impl PhaseState<Failure> {
    /// Creates a new failure phase.
    pub fn new(shared: Shared, error: PhaseError) -> Self {
        Self {
            private: Failure { error },
            shared,
        }
    }

    /// Gets the error which aborted the round.
    pub fn error(&self) -> &PhaseError {
        &self.private.error
    }

    /// Ends the aborted round and returns the error which aborted it.
    ///
    /// Tracking runs which are still open are finished. The nodes are not cleaned up, a failed
    /// round leaves them as they are.
    pub async fn conclude(mut self) -> PhaseError {
        let phase = PhaseName::Failure;
        let span = error_span!("run_phase", phase = %phase);

        async move {
            info!("starting phase");
            self.shared.events.broadcast_phase(phase);
            error!(
                "round of task {} failed: {}",
                self.shared.round_id(),
                self.private.error
            );

            if let Ok(run) = self.shared.state.scope.take() {
                info!("finishing the open tracking runs");
                if let Err(err) = finish_runs(self.shared.tracker.as_ref(), &run, true).await {
                    warn!("failed to finish the tracking runs: {}", err);
                }
            }

            info!("broadcasting invalidation of the global model");
            self.shared.events.broadcast_model(ModelUpdate::Invalidate);
            self.shared.events.broadcast_metrics(MetricsUpdate::Invalidate);

            self.private.error
        }
        .instrument(span)
        .await
    }
}
