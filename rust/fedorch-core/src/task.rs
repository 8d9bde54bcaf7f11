//! Round descriptions and their status.
//!
//! A [`Task`] is submitted by a user, persisted by the task intake and published as JSON on the
//! task queue, from where the coordinator picks it up and runs one round for it. Progress is
//! reported on a separate status queue as free text [`StatusUpdate`]s of the form
//! `task <id> <status>`.

use std::{fmt, str::FromStr};

use chrono::{NaiveDateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

/// The status of a task.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[display(fmt = "pending")]
    Pending,
    #[display(fmt = "running")]
    Running,
    #[display(fmt = "success")]
    Success,
    #[display(fmt = "failed")]
    Failed,
    #[display(fmt = "cancelled")]
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    /// Parses a status name, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(TaskError::UnknownStatus(s.to_string())),
        }
    }
}

/// Errors related to tasks and status updates.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid task payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid task: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("unknown task status: {0}")]
    UnknownStatus(String),

    #[error("malformed status update: {0:?}")]
    MalformedStatusUpdate(String),
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// The description of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Task {
    /// The id assigned by the task intake.
    #[serde(default)]
    pub id: Option<u64>,
    #[validate(length(min = 1))]
    pub user_id: String,
    /// The use case the nodes must serve to take part in the round.
    #[validate(length(min = 1))]
    pub use_case: String,
    #[validate(length(min = 1))]
    pub model_name: String,
    #[validate(range(min = 0))]
    pub model_version: i64,
    /// The number of training barriers of the round.
    pub num_global_iterations: u32,
    #[validate(length(min = 1))]
    pub run_name: String,
    #[validate(length(min = 1))]
    pub experiment_name: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default = "now")]
    pub created_at: NaiveDateTime,
}

impl Task {
    /// Deserializes and validates a task published on the task queue.
    ///
    /// # Errors
    /// Fails if the payload is not a task or if one of its fields is invalid.
    pub fn from_json(payload: &[u8]) -> Result<Self, TaskError> {
        let task: Task = serde_json::from_slice(payload)?;
        task.validate()?;
        Ok(task)
    }

    /// Serializes the task for the task queue.
    pub fn to_json(&self) -> Result<String, TaskError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Changes the status, the name of the new status is case insensitive.
    pub fn change_status(&mut self, status: &str) -> Result<(), TaskError> {
        self.status = status.parse()?;
        Ok(())
    }

    /// Creates the status update announcing `status` for this task.
    pub fn status_update(&self, status: TaskStatus) -> StatusUpdate {
        StatusUpdate {
            task_id: self.id.unwrap_or_default(),
            status,
        }
    }
}

/// A status change of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub task_id: u64,
    pub status: TaskStatus,
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} {}", self.task_id, self.status)
    }
}

impl FromStr for StatusUpdate {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TaskError::MalformedStatusUpdate(s.to_string());
        let mut parts = s.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("task"), Some(task_id), Some(status), None) => Ok(StatusUpdate {
                task_id: task_id.parse().map_err(|_| malformed())?,
                status: status.parse()?,
            }),
            _ => Err(malformed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "id": 1,
        "user_id": "user",
        "use_case": "iris",
        "model_name": "iris",
        "model_version": 1,
        "num_global_iterations": 10,
        "run_name": "run_name",
        "experiment_name": "experiment_name",
        "status": "pending",
        "created_at": "2021-01-01T00:00:00"
    }"#;

    #[test]
    fn test_task_serde() {
        let task = Task::from_json(PAYLOAD.as_bytes()).unwrap();
        assert_eq!(task.id, Some(1));
        assert_eq!(task.num_global_iterations, 10);
        assert_eq!(task.status, TaskStatus::Pending);

        let json = task.to_json().unwrap();
        assert_eq!(Task::from_json(json.as_bytes()).unwrap(), task);
    }

    #[test]
    fn test_task_defaults() {
        let payload = r#"{
            "user_id": "user",
            "use_case": "iris",
            "model_name": "iris",
            "model_version": 1,
            "num_global_iterations": 3,
            "run_name": "run",
            "experiment_name": "experiment"
        }"#;
        let task = Task::from_json(payload.as_bytes()).unwrap();
        assert_eq!(task.id, None);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_invalid_task() {
        let payload = PAYLOAD.replace(r#""use_case": "iris""#, r#""use_case": """#);
        assert!(matches!(
            Task::from_json(payload.as_bytes()),
            Err(TaskError::Validation(_))
        ));
        let payload = PAYLOAD.replace(r#""model_version": 1"#, r#""model_version": "1""#);
        assert!(matches!(
            Task::from_json(payload.as_bytes()),
            Err(TaskError::Json(_))
        ));
    }

    #[test]
    fn test_change_status() {
        let mut task = Task::from_json(PAYLOAD.as_bytes()).unwrap();
        task.change_status("RUNNING").unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        task.change_status("cancelled").unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.change_status("paused").is_err());
    }

    #[test]
    fn test_status_update() {
        let update: StatusUpdate = "task 12 failed".parse().unwrap();
        assert_eq!(
            update,
            StatusUpdate {
                task_id: 12,
                status: TaskStatus::Failed,
            }
        );
        assert_eq!(update.to_string(), "task 12 failed");

        assert!("task twelve failed".parse::<StatusUpdate>().is_err());
        assert!("job 12 failed".parse::<StatusUpdate>().is_err());
        assert!("task 12".parse::<StatusUpdate>().is_err());
        assert!("task 12 failed now".parse::<StatusUpdate>().is_err());
    }
}
