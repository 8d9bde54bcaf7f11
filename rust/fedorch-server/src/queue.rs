//! Consumption of the task queue and publishing of status updates.
//!
//! Tasks arrive as raw JSON payloads on the task queue. The [`Coordinator`] takes them one at a
//! time, runs one round per task and announces the progress of every task on the status queue,
//! where the [`StatusListener`] of the task intake picks it up.

use async_trait::async_trait;
use displaydoc::Display;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, info_span, warn};
use tracing_futures::Instrument;

#[cfg(test)]
use mockall::automock;

use fedorch_core::task::{StatusUpdate, Task, TaskStatus};

use crate::state_machine::{
    phases::{PhaseError, RoundSummary},
    RoundInitializer,
};

/// Errors of the queues.
#[derive(Debug, Display, Error)]
pub enum QueueError {
    /// the status queue is closed
    Closed,
}

/// A source of raw task payloads.
#[async_trait]
pub trait TaskSource: Send {
    /// Waits for the next payload. Returns `None` once the queue is closed.
    async fn next_payload(&mut self) -> Option<Vec<u8>>;
}

/// A sink for status updates.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, update: StatusUpdate) -> Result<(), QueueError>;
}

/// The receiving half of an in-process task queue.
#[derive(Debug)]
pub struct TaskReceiver(mpsc::Receiver<Vec<u8>>);

#[async_trait]
impl TaskSource for TaskReceiver {
    async fn next_payload(&mut self) -> Option<Vec<u8>> {
        self.0.recv().await
    }
}

/// Creates an in-process task queue which holds up to `buffer` payloads.
pub fn task_channel(buffer: usize) -> (mpsc::Sender<Vec<u8>>, TaskReceiver) {
    let (tx, rx) = mpsc::channel(buffer);
    (tx, TaskReceiver(rx))
}

/// The sending half of an in-process status queue. Updates travel as text lines.
#[derive(Debug, Clone)]
pub struct StatusSender(mpsc::Sender<String>);

#[async_trait]
impl StatusPublisher for StatusSender {
    async fn publish(&self, update: StatusUpdate) -> Result<(), QueueError> {
        self.0
            .send(update.to_string())
            .await
            .map_err(|_| QueueError::Closed)
    }
}

/// Creates an in-process status queue which holds up to `buffer` updates.
pub fn status_channel(buffer: usize) -> (StatusSender, StatusListener) {
    let (tx, rx) = mpsc::channel(buffer);
    (StatusSender(tx), StatusListener(rx))
}

/// The listening half of an in-process status queue.
#[derive(Debug)]
pub struct StatusListener(mpsc::Receiver<String>);

impl StatusListener {
    /// Waits for the next well-formed status update, lines which don't parse are skipped.
    ///
    /// Returns `None` once every sender has been dropped.
    pub async fn next_update(&mut self) -> Option<StatusUpdate> {
        while let Some(line) = self.0.recv().await {
            match line.parse() {
                Ok(update) => return Some(update),
                Err(err) => warn!("skipping status update: {}", err),
            }
        }
        None
    }
}

/// Runs one round for every task taken from a task queue.
pub struct Coordinator<P> {
    initializer: RoundInitializer,
    publisher: P,
}

impl<P> Coordinator<P>
where
    P: StatusPublisher,
{
    pub fn new(initializer: RoundInitializer, publisher: P) -> Self {
        Self {
            initializer,
            publisher,
        }
    }

    /// Runs the rounds of the tasks of `source` one after the other until the queue is closed.
    ///
    /// Payloads which aren't valid tasks are skipped. A failed round doesn't stop the
    /// coordinator.
    pub async fn run<S>(&self, mut source: S)
    where
        S: TaskSource,
    {
        while let Some(payload) = source.next_payload().await {
            match Task::from_json(&payload) {
                Ok(task) => match self.run_round(task).await {
                    Ok(summary) => info!(
                        "round of task {} completed after {} iterations",
                        summary.task_id, summary.iterations
                    ),
                    Err(err) => warn!("round failed, waiting for the next task: {}", err),
                },
                Err(err) => warn!("skipping task payload: {}", err),
            }
        }
        info!("task queue closed");
    }

    /// Runs the round of `task` and publishes its status before and after the round.
    pub async fn run_round(&self, mut task: Task) -> Result<RoundSummary, PhaseError> {
        let task_id = task.id.unwrap_or_default();
        task.status = TaskStatus::Running;
        self.publish(task.status_update(TaskStatus::Running)).await;

        let result = self
            .initializer
            .init(task)
            .run()
            .instrument(info_span!("round", task_id))
            .await;

        let status = match &result {
            Ok(_) => TaskStatus::Success,
            Err(_) => TaskStatus::Failed,
        };
        self.publish(StatusUpdate { task_id, status }).await;
        result
    }

    async fn publish(&self, update: StatusUpdate) {
        if let Err(err) = self.publisher.publish(update).await {
            warn!("failed to publish \"{}\": {}", update, err);
        }
    }
}
