use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    records::MetricsRecord,
    tracking::{Tracker, TrackingError},
};

/// A run recorded by a [`MemoryTracker`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub experiment_id: String,
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub name: String,
    pub tags: Vec<(String, String)>,
    pub metrics: Vec<(u32, MetricsRecord)>,
    pub dataset_source: Option<String>,
    pub finished: bool,
}

#[derive(Debug, Default)]
struct TrackerState {
    experiments: Vec<String>,
    runs: Vec<RunRecord>,
}

impl TrackerState {
    fn run_mut(&mut self, run_id: &str) -> Result<&mut RunRecord, TrackingError> {
        self.runs
            .iter_mut()
            .find(|run| run.run_id == run_id)
            .ok_or_else(|| TrackingError::UnknownRun(run_id.to_string()))
    }

    fn open_run_mut(&mut self, run_id: &str) -> Result<&mut RunRecord, TrackingError> {
        let run = self.run_mut(run_id)?;
        if run.finished {
            return Err(TrackingError::RunFinished(run_id.to_string()));
        }
        Ok(run)
    }

    fn push_run(&mut self, experiment_id: &str, parent: Option<&str>, name: &str) -> String {
        let run_id = format!("run-{}", self.runs.len() + 1);
        self.runs.push(RunRecord {
            experiment_id: experiment_id.to_string(),
            run_id: run_id.clone(),
            parent_run_id: parent.map(str::to_string),
            name: name.to_string(),
            tags: Vec::new(),
            metrics: Vec::new(),
            dataset_source: None,
            finished: false,
        });
        run_id
    }
}

/// An experiment tracker keeping its runs in memory.
///
/// Experiments are identified by their position, starting at `1`.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    state: Mutex<TrackerState>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a snapshot of all runs in creation order.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn run(&self, run_id: &str) -> Option<RunRecord> {
        self.runs().into_iter().find(|run| run.run_id == run_id)
    }

    /// Gets the runs nested under a parent run.
    pub fn children_of(&self, parent_run_id: &str) -> Vec<RunRecord> {
        self.runs()
            .into_iter()
            .filter(|run| run.parent_run_id.as_deref() == Some(parent_run_id))
            .collect()
    }
}

#[async_trait]
impl Tracker for MemoryTracker {
    async fn create_run(
        &self,
        experiment_name: &str,
        run_name: &str,
    ) -> Result<(String, String), TrackingError> {
        let mut state = self.state.lock().unwrap();
        let position = match state.experiments.iter().position(|e| e == experiment_name) {
            Some(position) => position,
            None => {
                state.experiments.push(experiment_name.to_string());
                state.experiments.len() - 1
            }
        };
        let experiment_id = (position + 1).to_string();
        let run_id = state.push_run(&experiment_id, None, run_name);
        Ok((experiment_id, run_id))
    }

    async fn create_child_run(
        &self,
        experiment_id: &str,
        parent_run_id: &str,
        run_name: &str,
    ) -> Result<String, TrackingError> {
        let mut state = self.state.lock().unwrap();
        let known = experiment_id
            .parse::<usize>()
            .map(|id| id >= 1 && id <= state.experiments.len())
            .unwrap_or(false);
        if !known {
            return Err(TrackingError::UnknownExperiment(experiment_id.to_string()));
        }
        state.open_run_mut(parent_run_id)?;
        Ok(state.push_run(experiment_id, Some(parent_run_id), run_name))
    }

    async fn set_tags(&self, run_id: &str, tags: &[(&str, &str)]) -> Result<(), TrackingError> {
        let mut state = self.state.lock().unwrap();
        let run = state.open_run_mut(run_id)?;
        run.tags.extend(
            tags.iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );
        Ok(())
    }

    async fn log_metrics(
        &self,
        run_id: &str,
        metrics: &MetricsRecord,
        step: u32,
    ) -> Result<(), TrackingError> {
        let mut state = self.state.lock().unwrap();
        state.open_run_mut(run_id)?.metrics.push((step, metrics.clone()));
        Ok(())
    }

    async fn set_dataset_signature(&self, run_id: &str, source: &str) -> Result<(), TrackingError> {
        let mut state = self.state.lock().unwrap();
        state.open_run_mut(run_id)?.dataset_source = Some(source.to_string());
        Ok(())
    }

    async fn finish_run(&self, run_id: &str) -> Result<(), TrackingError> {
        let mut state = self.state.lock().unwrap();
        state.open_run_mut(run_id)?.finished = true;
        Ok(())
    }
}
