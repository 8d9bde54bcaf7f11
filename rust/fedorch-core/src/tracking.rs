//! Experiment tracking.
//!
//! A round is recorded as a parent run in the experiment named by the task. The coordinator
//! opens a `global` child run for the aggregated metrics and every node opens a child run named
//! after itself for its local metrics. The identifiers of these runs make up the [`RunConfig`],
//! which is set once when the round is configured and cleared when it ends.

use async_trait::async_trait;
use displaydoc::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::records::MetricsRecord;

/// The name of the child run of the coordinator.
pub const GLOBAL_RUN_NAME: &str = "global";

/// The tracking identifiers of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub experiment_id: String,
    pub parent_run_id: String,
    /// The run metrics are logged to.
    pub child_run_id: String,
    pub model_name: String,
    pub model_version: i64,
}

/// Errors of the run configuration lifecycle.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum RunScopeError {
    /// A run configuration is already set.
    AlreadyConfigured,
    /// No run configuration is set.
    NotConfigured,
}

/// Errors of a [`Tracker`].
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("experiment {0} does not exist")]
    UnknownExperiment(String),

    #[error("run {0} does not exist")]
    UnknownRun(String),

    #[error("run {0} is already finished")]
    RunFinished(String),

    #[error(transparent)]
    Scope(#[from] RunScopeError),

    #[error("tracking backend failed: {0}")]
    Backend(#[from] anyhow::Error),
}

/// The experiment tracking service.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Creates a parent run and returns `(experiment_id, run_id)`.
    async fn create_run(
        &self,
        experiment_name: &str,
        run_name: &str,
    ) -> Result<(String, String), TrackingError>;

    /// Creates a run nested under `parent_run_id` and returns its id.
    async fn create_child_run(
        &self,
        experiment_id: &str,
        parent_run_id: &str,
        run_name: &str,
    ) -> Result<String, TrackingError>;

    /// Sets tags on a run.
    async fn set_tags(&self, run_id: &str, tags: &[(&str, &str)]) -> Result<(), TrackingError>;

    /// Logs metrics at the given step.
    async fn log_metrics(
        &self,
        run_id: &str,
        metrics: &MetricsRecord,
        step: u32,
    ) -> Result<(), TrackingError>;

    /// Records where the data used by a run comes from.
    async fn set_dataset_signature(&self, run_id: &str, source: &str) -> Result<(), TrackingError>;

    /// Marks a run as finished.
    async fn finish_run(&self, run_id: &str) -> Result<(), TrackingError>;
}

/// Holds the [`RunConfig`] of the current round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunScope {
    current: Option<RunConfig>,
}

impl RunScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run configuration.
    ///
    /// # Errors
    /// Fails if a run configuration is already set.
    pub fn set(&mut self, config: RunConfig) -> Result<(), RunScopeError> {
        if self.current.is_some() {
            return Err(RunScopeError::AlreadyConfigured);
        }
        self.current = Some(config);
        Ok(())
    }

    /// Gets the run configuration.
    ///
    /// # Errors
    /// Fails if no run configuration is set.
    pub fn current(&self) -> Result<&RunConfig, RunScopeError> {
        self.current.as_ref().ok_or(RunScopeError::NotConfigured)
    }

    /// Clears the run configuration and returns it.
    ///
    /// # Errors
    /// Fails if no run configuration is set.
    pub fn take(&mut self) -> Result<RunConfig, RunScopeError> {
        self.current.take().ok_or(RunScopeError::NotConfigured)
    }

    pub fn is_set(&self) -> bool {
        self.current.is_some()
    }
}

/// Finishes the child run of `config`, and its parent run if `include_parent` is set.
pub async fn finish_runs(
    tracker: &dyn Tracker,
    config: &RunConfig,
    include_parent: bool,
) -> Result<(), TrackingError> {
    tracker.finish_run(&config.child_run_id).await?;
    if include_parent {
        tracker.finish_run(&config.parent_run_id).await?;
    }
    Ok(())
}

/// Formats the dataset signature of a node.
pub fn dataset_source(node_name: &str, data_path: &str) -> String {
    format!("{}://{}", node_name, data_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        RunConfig {
            experiment_id: "1".to_string(),
            parent_run_id: "parent".to_string(),
            child_run_id: "child".to_string(),
            model_name: "iris".to_string(),
            model_version: 1,
        }
    }

    #[test]
    fn test_scope_is_set_once() {
        let mut scope = RunScope::new();
        assert_eq!(scope.current(), Err(RunScopeError::NotConfigured));

        scope.set(config()).unwrap();
        assert_eq!(scope.current(), Ok(&config()));
        assert_eq!(scope.set(config()), Err(RunScopeError::AlreadyConfigured));
    }

    #[test]
    fn test_scope_is_cleared_once() {
        let mut scope = RunScope::new();
        scope.set(config()).unwrap();
        assert_eq!(scope.take(), Ok(config()));
        assert!(!scope.is_set());
        assert_eq!(scope.take(), Err(RunScopeError::NotConfigured));
    }

    #[test]
    fn test_dataset_source() {
        assert_eq!(
            dataset_source("node-1", "/data/iris.csv"),
            "node-1:///data/iris.csv"
        );
    }
}
