//! Local learners and the tabular data they train on.

use thiserror::Error;

use crate::records::{ArrayError, MetricsRecord, ParametersRecord};

/// Errors related to the construction of a [`Dataset`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatasetError {
    #[error("the dataset has no columns")]
    NoColumns,

    #[error("row {row} has {found} fields but the dataset has {expected} columns")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// A table of raw string fields with named columns.
///
/// Turning the fields into features and labels is up to the [`LocalLearner`], see
/// [`LocalLearner::prepare_data()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Creates a dataset.
    ///
    /// # Errors
    /// Fails if there are no columns or if a row doesn't have one field per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, DatasetError> {
        if columns.is_empty() {
            return Err(DatasetError::NoColumns);
        }
        if let Some((row, fields)) = rows
            .iter()
            .enumerate()
            .find(|(_, fields)| fields.len() != columns.len())
        {
            return Err(DatasetError::RaggedRow {
                row,
                expected: columns.len(),
                found: fields.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Errors raised by a [`LocalLearner`].
#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("no data has been prepared")]
    NoData,

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Array(#[from] ArrayError),
}

/// A trainable model held by a node for the duration of a round.
///
/// Implementations must leave their state untouched when an operation fails.
pub trait LocalLearner: Send + Sync {
    /// Turns a raw dataset into training features and labels.
    fn prepare_data(&mut self, data: &Dataset) -> Result<(), LearnerError>;

    /// Runs one local training pass over the prepared data and returns the training metrics.
    fn train(&mut self) -> Result<MetricsRecord, LearnerError>;

    /// Evaluates the current parameters on the prepared data.
    fn evaluate(&self) -> Result<MetricsRecord, LearnerError>;

    /// Gets the current parameters.
    fn get_parameters(&self) -> ParametersRecord;

    /// Overwrites the current parameters.
    fn set_parameters(&mut self, parameters: &ParametersRecord) -> Result<(), LearnerError>;
}
