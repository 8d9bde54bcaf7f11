use async_trait::async_trait;
use tracing::info;

use fedorch_core::{records::ParametersRecord, reply::UploadReceipt, tracking::finish_runs};

use crate::state_machine::{
    phases::{Complete, Phase, PhaseError, PhaseName, PhaseState, RoundSummary, Shared},
    StateMachine,
};

/// The finalize state.
#[derive(Debug)]
pub struct Finalize {
    /// The final global parameters.
    parameters: ParametersRecord,
    /// The registry identifiers of the uploaded model.
    upload: Option<UploadReceipt>,
}

#[async_trait]
impl Phase for PhaseState<Finalize> {
    const NAME: PhaseName = PhaseName::Finalize;

    /// Uploads the final model, finishes the tracking runs and cleans up the nodes.
    async fn process(&mut self) -> Result<(), PhaseError> {
        let node_ids = &self.shared.state.node_ids;
        let upload = self
            .shared
            .flow
            .upload_model(node_ids, self.private.parameters.clone())
            .await?;
        info!(
            "uploaded model {} attached to run {}",
            upload.model_id, upload.run_id
        );
        self.private.upload = Some(upload);

        let run = self.shared.state.scope.take()?;
        finish_runs(self.shared.tracker.as_ref(), &run, true).await?;
        info!("finished the tracking runs");

        self.shared.flow.clean_config(&self.shared.state.node_ids).await?;
        Ok(())
    }

    fn next(self) -> StateMachine {
        let PhaseState { private, shared } = self;
        match private.upload {
            Some(upload) => {
                let state = &shared.state;
                let summary = RoundSummary {
                    task_id: shared.round_id(),
                    node_ids: state.node_ids.clone(),
                    iterations: state.iterations,
                    metrics: state.metrics.clone(),
                    parameters: private.parameters,
                    upload,
                };
                PhaseState::<Complete>::new(shared, summary).into()
            }
            None => PhaseState { private, shared }.into_failure_state(PhaseError::NoUpload),
        }
    }
}

impl PhaseState<Finalize> {
    /// Creates a new finalize state.
    pub fn new(shared: Shared, parameters: ParametersRecord) -> Self {
        Self {
            private: Finalize {
                parameters,
                upload: None,
            },
            shared,
        }
    }
}
