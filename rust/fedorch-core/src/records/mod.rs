//! Typed records carried by messages.
//!
//! A [`RecordSet`] is the content of every message exchanged during a round. It bundles three
//! kinds of named records:
//!
//! - [`ConfigsRecord`]s: scalar configuration values (strings, integers, floats, booleans and
//!   raw bytes). Control messages put their operation specific fields into the record named
//!   [`CONFIG_RECORD`].
//! - [`ParametersRecord`]s: the learnable state of a model, an ordered mapping from parameter
//!   names to [`Array`]s. Stored under [`PARAMETERS_RECORD`].
//! - [`MetricsRecord`]s: training or evaluation metrics, stored under [`METRICS_RECORD`].
//!
//! Typed accessors never coerce values: reading a field with the wrong type fails with a
//! [`FieldError`].

mod array;
mod keyed;
mod serialization;

pub use self::{
    array::{Array, ArrayError, DataType, Element, UnknownDataType, NUMPY_STYPE},
    keyed::KeyedRecord,
    serialization::ArrayBuffer,
};

use std::convert::TryFrom;

use derive_more::From;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The name of the configuration record of a record set.
pub const CONFIG_RECORD: &str = "config";
/// The name of the parameters record of a record set.
pub const PARAMETERS_RECORD: &str = "parameters";
/// The name of the metrics record of a record set.
pub const METRICS_RECORD: &str = "metrics";

/// The learnable state of a model.
pub type ParametersRecord = KeyedRecord<Array>;

/// Named metric values.
pub type MetricsRecord = KeyedRecord<MetricValue>;

/// Named configuration values.
pub type ConfigsRecord = KeyedRecord<ConfigValue>;

/// A metric value.
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
}

impl MetricValue {
    /// Gets the value as a number, if it is a scalar.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Int(value) => Some(*value as f64),
            MetricValue::Float(value) => Some(*value),
            MetricValue::IntList(_) | MetricValue::FloatList(_) => None,
        }
    }
}

/// A configuration value.
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl ConfigValue {
    /// Gets the name of the type of the value.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Str(_) => "str",
            ConfigValue::Int(_) => "int",
            ConfigValue::Float(_) => "float",
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Bytes(_) => "bytes",
        }
    }
}

/// Errors related to reading a field of a record set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("missing field `{0}`")]
    Missing(String),

    #[error("field `{key}` must be of type {expected}, got {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("field `{key}` is out of range: {value}")]
    OutOfRange { key: String, value: i64 },
}

impl KeyedRecord<ConfigValue> {
    fn require(&self, key: &str) -> Result<&ConfigValue, FieldError> {
        self.get(key)
            .ok_or_else(|| FieldError::Missing(key.to_string()))
    }

    fn mismatch(key: &str, expected: &'static str, found: &ConfigValue) -> FieldError {
        FieldError::TypeMismatch {
            key: key.to_string(),
            expected,
            found: found.type_name(),
        }
    }

    /// Reads a string field.
    pub fn get_str(&self, key: &str) -> Result<&str, FieldError> {
        match self.require(key)? {
            ConfigValue::Str(value) => Ok(value),
            other => Err(Self::mismatch(key, "str", other)),
        }
    }

    /// Reads an integer field.
    pub fn get_int(&self, key: &str) -> Result<i64, FieldError> {
        match self.require(key)? {
            ConfigValue::Int(value) => Ok(*value),
            other => Err(Self::mismatch(key, "int", other)),
        }
    }

    /// Reads a non-negative integer field that fits into a `u32`.
    pub fn get_u32(&self, key: &str) -> Result<u32, FieldError> {
        let value = self.get_int(key)?;
        u32::try_from(value).map_err(|_| FieldError::OutOfRange {
            key: key.to_string(),
            value,
        })
    }

    /// Reads a boolean field.
    pub fn get_bool(&self, key: &str) -> Result<bool, FieldError> {
        match self.require(key)? {
            ConfigValue::Bool(value) => Ok(*value),
            other => Err(Self::mismatch(key, "bool", other)),
        }
    }
}

/// The content of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub parameters_records: KeyedRecord<ParametersRecord>,
    pub metrics_records: KeyedRecord<MetricsRecord>,
    pub configs_records: KeyedRecord<ConfigsRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the [`CONFIG_RECORD`].
    pub fn with_config(mut self, config: ConfigsRecord) -> Self {
        self.configs_records.insert(CONFIG_RECORD, config);
        self
    }

    /// Sets the [`PARAMETERS_RECORD`].
    pub fn with_parameters(mut self, parameters: ParametersRecord) -> Self {
        self.parameters_records.insert(PARAMETERS_RECORD, parameters);
        self
    }

    /// Sets the [`METRICS_RECORD`].
    pub fn with_metrics(mut self, metrics: MetricsRecord) -> Self {
        self.metrics_records.insert(METRICS_RECORD, metrics);
        self
    }

    /// Gets the [`CONFIG_RECORD`].
    pub fn config(&self) -> Result<&ConfigsRecord, FieldError> {
        self.configs_records
            .get(CONFIG_RECORD)
            .ok_or_else(|| FieldError::Missing(CONFIG_RECORD.to_string()))
    }

    /// Gets the [`PARAMETERS_RECORD`].
    pub fn parameters(&self) -> Result<&ParametersRecord, FieldError> {
        self.parameters_records
            .get(PARAMETERS_RECORD)
            .ok_or_else(|| FieldError::Missing(PARAMETERS_RECORD.to_string()))
    }

    /// Gets the [`METRICS_RECORD`].
    pub fn metrics(&self) -> Result<&MetricsRecord, FieldError> {
        self.metrics_records
            .get(METRICS_RECORD)
            .ok_or_else(|| FieldError::Missing(METRICS_RECORD.to_string()))
    }
}
