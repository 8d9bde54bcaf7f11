use async_trait::async_trait;
use tracing::{debug, info, warn};

use fedorch_core::tracking::{RunConfig, Tracker, GLOBAL_RUN_NAME};

use crate::state_machine::{
    phases::{Load, Phase, PhaseError, PhaseName, PhaseState, Shared},
    StateMachine,
};

/// The configure state.
#[derive(Debug)]
pub struct Configure;

#[async_trait]
impl Phase for PhaseState<Configure> {
    const NAME: PhaseName = PhaseName::Configure;

    /// Opens the tracking runs of the round and hands their identifiers to the nodes.
    async fn process(&mut self) -> Result<(), PhaseError> {
        let task = &self.shared.state.task;
        let tracker = self.shared.tracker.as_ref();

        let (experiment_id, parent_run_id) = tracker
            .create_run(&task.experiment_name, &task.run_name)
            .await?;
        info!(
            "created run {} in experiment {}",
            parent_run_id, experiment_id
        );
        let round_id = self.shared.round_id().to_string();
        let tags = [
            ("task_id", round_id.as_str()),
            ("use_case", task.use_case.as_str()),
        ];
        let child_run_id =
            match open_global_run(tracker, &experiment_id, &parent_run_id, &tags).await {
                Ok(child_run_id) => child_run_id,
                Err(err) => {
                    // the parent run is not in scope yet, so the failure phase can't finish it
                    if let Err(finish_err) = tracker.finish_run(&parent_run_id).await {
                        warn!("failed to finish run {}: {}", parent_run_id, finish_err);
                    }
                    return Err(err);
                }
            };
        debug!("created child run {}", child_run_id);

        let run = RunConfig {
            experiment_id,
            parent_run_id,
            child_run_id,
            model_name: task.model_name.clone(),
            model_version: task.model_version,
        };
        self.shared.state.scope.set(run.clone())?;

        self.shared
            .flow
            .set_run_config(
                &self.shared.state.node_ids,
                &run.experiment_id,
                &run.parent_run_id,
                &run.model_name,
                run.model_version,
            )
            .await?;
        Ok(())
    }

    fn next(self) -> StateMachine {
        PhaseState::<Load>::new(self.shared).into()
    }
}

impl PhaseState<Configure> {
    /// Creates a new configure state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Configure,
            shared,
        }
    }
}

/// Tags the parent run and creates the run the global metrics are logged to.
async fn open_global_run(
    tracker: &dyn Tracker,
    experiment_id: &str,
    parent_run_id: &str,
    tags: &[(&str, &str)],
) -> Result<String, PhaseError> {
    tracker.set_tags(parent_run_id, tags).await?;
    let child_run_id = tracker
        .create_child_run(experiment_id, parent_run_id, GLOBAL_RUN_NAME)
        .await?;
    Ok(child_run_id)
}
