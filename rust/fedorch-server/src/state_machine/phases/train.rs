use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use fedorch_core::records::{MetricsRecord, ParametersRecord};

use crate::state_machine::{
    events::{MetricsUpdate, ModelUpdate},
    phases::{Finalize, Phase, PhaseError, PhaseName, PhaseState, Shared},
    StateMachine,
};

/// The train state.
#[derive(Debug)]
pub struct Train {
    /// The zero based index of the training iteration.
    iteration: u32,
    /// The global parameters, the nodes train from them and they are replaced by the aggregate.
    parameters: ParametersRecord,
    /// The aggregated metrics of this iteration.
    metrics: MetricsRecord,
}

#[async_trait]
impl Phase for PhaseState<Train> {
    const NAME: PhaseName = PhaseName::Train;

    /// Runs one training barrier and aggregates its results.
    async fn process(&mut self) -> Result<(), PhaseError> {
        let iteration = self.private.iteration;
        info!(
            "training iteration {} of {}",
            iteration + 1,
            self.shared.state.task.num_global_iterations
        );
        let node_ids = &self.shared.state.node_ids;
        let results = self
            .shared
            .flow
            .train_model(node_ids, self.private.parameters.clone(), iteration)
            .await?;
        debug!("received {} training results", results.len());

        let aggregator = self
            .shared
            .state
            .aggregator
            .as_ref()
            .ok_or(PhaseError::NoAggregator)?;
        let (parameters, metrics): (Vec<_>, Vec<_>) = results.into_iter().unzip();
        let parameters = aggregator.aggregate_parameters(&parameters)?;
        let metrics = aggregator.aggregate_metrics(&metrics)?;
        debug!("aggregated metrics: {:?}", metrics);

        let run = self.shared.state.scope.current()?;
        self.shared
            .tracker
            .log_metrics(&run.child_run_id, &metrics, iteration)
            .await?;

        self.shared
            .flow
            .set_parameters(node_ids, parameters.clone())
            .await?;

        self.private.parameters = parameters;
        self.private.metrics = metrics.clone();
        self.shared.state.metrics = Some(metrics);
        self.shared.state.iterations = iteration + 1;
        Ok(())
    }

    fn broadcast(&mut self) {
        info!("broadcasting the aggregated global model");
        self.shared
            .events
            .broadcast_model(ModelUpdate::New(Arc::new(self.private.parameters.clone())));

        info!("broadcasting the aggregated metrics");
        self.shared.events.broadcast_metrics(MetricsUpdate::New {
            step: self.private.iteration,
            metrics: Arc::new(self.private.metrics.clone()),
        });
    }

    fn next(self) -> StateMachine {
        let next_iteration = self.private.iteration + 1;
        let parameters = self.private.parameters;
        if next_iteration < self.shared.state.task.num_global_iterations {
            PhaseState::<Train>::new(self.shared, next_iteration, parameters).into()
        } else {
            PhaseState::<Finalize>::new(self.shared, parameters).into()
        }
    }
}

impl PhaseState<Train> {
    /// Creates a new train state for the given iteration.
    pub fn new(shared: Shared, iteration: u32, parameters: ParametersRecord) -> Self {
        Self {
            private: Train {
                iteration,
                parameters,
                metrics: MetricsRecord::new(),
            },
            shared,
        }
    }
}
