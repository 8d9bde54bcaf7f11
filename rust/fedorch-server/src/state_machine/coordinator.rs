//! The coordinator state of a round.

use std::fmt;

use fedorch_core::{
    aggregation::Aggregator,
    records::MetricsRecord,
    task::Task,
    tracking::RunScope,
    NodeId,
};

use crate::settings::RoundSettings;

/// The mutable state of one round.
///
/// A fresh state is created for every task, nothing is carried over from a previous round.
pub struct CoordinatorState {
    /// The task the round runs for.
    pub task: Task,
    /// The round settings.
    pub settings: RoundSettings,
    /// The participating nodes, in the order they replied to the filter request.
    pub node_ids: Vec<NodeId>,
    /// The tracking identifiers of the round, set while runs are open.
    pub scope: RunScope,
    /// The aggregator of the model of the task, available once the model has been loaded.
    pub aggregator: Option<Box<dyn Aggregator>>,
    /// The metrics aggregated in the latest training iteration.
    pub metrics: Option<MetricsRecord>,
    /// The number of completed training iterations.
    pub iterations: u32,
}

impl fmt::Debug for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorState")
            .field("task", &self.task)
            .field("settings", &self.settings)
            .field("node_ids", &self.node_ids)
            .field("scope", &self.scope)
            .field("aggregator", &self.aggregator.is_some())
            .field("metrics", &self.metrics)
            .field("iterations", &self.iterations)
            .finish()
    }
}

impl CoordinatorState {
    pub fn new(task: Task, settings: RoundSettings) -> Self {
        Self {
            task,
            settings,
            node_ids: Vec::new(),
            scope: RunScope::new(),
            aggregator: None,
            metrics: None,
            iterations: 0,
        }
    }

    /// Gets the id of the round, which is the id of its task.
    pub fn round_id(&self) -> u64 {
        self.task.id.unwrap_or_default()
    }
}
