//! Aggregation of parameters and metrics.
//!
//! The coordinator combines the replies of one training barrier into a single global
//! [`ParametersRecord`] and a single [`MetricsRecord`]. Both are combined with an unweighted,
//! elementwise arithmetic mean: every node counts the same, regardless of how much data it
//! trained on.
//!
//! Floating point arrays are summed as `f64` tensors. Integer arrays are summed as `i128`
//! tensors, so that the sums of `int64` parameters stay exact, and their mean is rounded to the
//! nearest integer, halves rounded up.
//!
//! Records are aggregated one at a time with [`ParametersAggregation`] and
//! [`MetricsAggregation`]. The first record fixes the expected layout (keys, data types and
//! shapes for parameters, keys for metrics) and every further record must be validated against
//! it with `validate_aggregation()` before it is added. The [`Aggregator`] trait is the strategy
//! interface the coordinator uses; [`MeanAggregator`] implements it on top of the two
//! accumulators.

use ndarray::{ArrayD, IxDyn, ShapeError};
use thiserror::Error;

use crate::records::{Array, ArrayError, DataType, MetricValue, MetricsRecord, ParametersRecord};

/// Errors related to the aggregation of parameters and metrics.
#[derive(Debug, Error, PartialEq)]
pub enum AggregationError {
    #[error("there is nothing to aggregate")]
    Empty,

    #[error("the keys {found:?} don't match the aggregated keys {expected:?}")]
    KeyMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("parameter `{key}` has shape {found:?} but the aggregated shape is {expected:?}")]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("parameter `{key}` has type {found} but the aggregated type is {expected}")]
    DataTypeMismatch {
        key: String,
        expected: DataType,
        found: DataType,
    },

    #[error("metric `{0}` is not a numeric scalar")]
    NonNumericMetric(String),

    #[error("the aggregated parameters are invalid: {0}")]
    InvalidArray(#[from] ArrayError),

    #[error("the elements of a parameter don't fit its shape: {0}")]
    InvalidShape(#[from] ShapeError),
}

/// The running sum of one parameter.
#[derive(Debug, Clone)]
enum Sum {
    Float(ArrayD<f64>),
    Integer(ArrayD<i128>),
}

impl Sum {
    fn new(array: &Array) -> Result<Self, AggregationError> {
        let shape = IxDyn(array.shape());
        let sum = match array.to_i128_values() {
            Some(values) => Sum::Integer(ArrayD::from_shape_vec(shape, values)?),
            None => Sum::Float(ArrayD::from_shape_vec(shape, array.to_f64_values())?),
        };
        Ok(sum)
    }

    fn add(&mut self, array: &Array) -> Result<(), AggregationError> {
        match (self, Sum::new(array)?) {
            (Sum::Float(sum), Sum::Float(tensor)) => sum.scaled_add(1.0, &tensor),
            (Sum::Integer(sum), Sum::Integer(tensor)) => *sum += &tensor,
            _ => {}
        }
        Ok(())
    }

    fn mean(&self, dtype: DataType, count: usize) -> Result<Array, AggregationError> {
        let array = match self {
            Sum::Float(sum) => {
                let mean = sum / count as f64;
                Array::from_f64_values(dtype, mean.shape().to_vec(), &row_major(&mean))?
            }
            Sum::Integer(sum) => {
                let count = count as i128;
                let mean = sum.mapv(|sum| {
                    let quotient = sum.div_euclid(count);
                    if 2 * sum.rem_euclid(count) >= count {
                        quotient + 1
                    } else {
                        quotient
                    }
                });
                Array::from_i128_values(dtype, mean.shape().to_vec(), &row_major(&mean))?
            }
        };
        Ok(array)
    }
}

fn row_major<A: Copy>(tensor: &ArrayD<A>) -> Vec<A> {
    tensor.iter().copied().collect()
}

#[derive(Debug, Clone)]
struct Slot {
    key: String,
    dtype: DataType,
    shape: Vec<usize>,
    sum: Sum,
}

/// An accumulator for the mean of parameter records.
#[derive(Debug, Clone, Default)]
pub struct ParametersAggregation {
    nb_records: usize,
    slots: Vec<Slot>,
}

#[allow(clippy::len_without_is_empty)]
impl ParametersAggregation {
    /// Creates a new, empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of aggregated records.
    pub fn len(&self) -> usize {
        self.nb_records
    }

    /// Validates that `record` may be aggregated.
    ///
    /// # Errors
    /// Fails if some records have already been aggregated and `record` doesn't have the same
    /// key set, or if the data type or the shape of one of its arrays differs.
    pub fn validate_aggregation(&self, record: &ParametersRecord) -> Result<(), AggregationError> {
        if self.nb_records == 0 {
            return Ok(());
        }

        let same_keys = record.len() == self.slots.len()
            && self.slots.iter().all(|slot| record.contains_key(&slot.key));
        if !same_keys {
            return Err(AggregationError::KeyMismatch {
                expected: self.slots.iter().map(|slot| slot.key.clone()).collect(),
                found: record.keys().map(String::from).collect(),
            });
        }

        for slot in &self.slots {
            // the key set has been checked above
            let array = match record.get(&slot.key) {
                Some(array) => array,
                None => continue,
            };
            if array.dtype() != slot.dtype {
                return Err(AggregationError::DataTypeMismatch {
                    key: slot.key.clone(),
                    expected: slot.dtype,
                    found: array.dtype(),
                });
            }
            if array.shape() != slot.shape.as_slice() {
                return Err(AggregationError::ShapeMismatch {
                    key: slot.key.clone(),
                    expected: slot.shape.clone(),
                    found: array.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Aggregates `record`.
    ///
    /// It should be checked that [`validate_aggregation()`] succeeds before calling this, the
    /// arrays of a mismatching record are skipped.
    ///
    /// # Errors
    /// Fails if an array can't be viewed as a tensor of its shape.
    ///
    /// [`validate_aggregation()`]: ParametersAggregation::validate_aggregation
    pub fn aggregate(&mut self, record: &ParametersRecord) -> Result<(), AggregationError> {
        if self.nb_records == 0 {
            self.slots = record
                .iter()
                .map(|(key, array)| {
                    Ok(Slot {
                        key: key.to_string(),
                        dtype: array.dtype(),
                        shape: array.shape().to_vec(),
                        sum: Sum::new(array)?,
                    })
                })
                .collect::<Result<_, AggregationError>>()?;
        } else {
            for slot in self.slots.iter_mut() {
                match record.get(&slot.key) {
                    Some(array) if array.shape() == slot.shape.as_slice() => slot.sum.add(array)?,
                    _ => {}
                }
            }
        }
        self.nb_records += 1;
        Ok(())
    }

    /// Computes the mean of the aggregated records.
    ///
    /// The arrays keep the key order, data types and shapes of the first aggregated record.
    ///
    /// # Errors
    /// Fails if nothing has been aggregated yet.
    pub fn mean(&self) -> Result<ParametersRecord, AggregationError> {
        if self.nb_records == 0 {
            return Err(AggregationError::Empty);
        }
        self.slots
            .iter()
            .map(|slot| {
                let mean = slot.sum.mean(slot.dtype, self.nb_records)?;
                Ok::<_, AggregationError>((slot.key.clone(), mean))
            })
            .collect()
    }
}

/// An accumulator for the mean of metrics records.
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregation {
    nb_records: usize,
    sums: Vec<(String, f64)>,
}

#[allow(clippy::len_without_is_empty)]
impl MetricsAggregation {
    /// Creates a new, empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of aggregated records.
    pub fn len(&self) -> usize {
        self.nb_records
    }

    /// Validates that `record` may be aggregated.
    ///
    /// # Errors
    /// Fails if one of the values is not a numeric scalar, or if some records have already been
    /// aggregated and `record` doesn't have the same key set.
    pub fn validate_aggregation(&self, record: &MetricsRecord) -> Result<(), AggregationError> {
        if let Some((key, _)) = record.iter().find(|(_, value)| value.as_scalar().is_none()) {
            return Err(AggregationError::NonNumericMetric(key.to_string()));
        }

        if self.nb_records == 0 {
            return Ok(());
        }

        let same_keys = record.len() == self.sums.len()
            && self.sums.iter().all(|(key, _)| record.contains_key(key));
        if !same_keys {
            return Err(AggregationError::KeyMismatch {
                expected: self.sums.iter().map(|(key, _)| key.clone()).collect(),
                found: record.keys().map(String::from).collect(),
            });
        }
        Ok(())
    }

    /// Aggregates `record`. Non-scalar values are ignored, see [`validate_aggregation()`].
    ///
    /// [`validate_aggregation()`]: MetricsAggregation::validate_aggregation
    pub fn aggregate(&mut self, record: &MetricsRecord) {
        if self.nb_records == 0 {
            self.sums = record
                .iter()
                .filter_map(|(key, value)| Some((key.to_string(), value.as_scalar()?)))
                .collect();
        } else {
            for (key, sum) in self.sums.iter_mut() {
                if let Some(value) = record.get(key).and_then(MetricValue::as_scalar) {
                    *sum += value;
                }
            }
        }
        self.nb_records += 1;
    }

    /// Computes the mean of the aggregated records. Every mean is a float.
    ///
    /// # Errors
    /// Fails if nothing has been aggregated yet.
    pub fn mean(&self) -> Result<MetricsRecord, AggregationError> {
        if self.nb_records == 0 {
            return Err(AggregationError::Empty);
        }
        let count = self.nb_records as f64;
        Ok(self
            .sums
            .iter()
            .map(|(key, sum)| (key.clone(), MetricValue::Float(sum / count)))
            .collect())
    }
}

/// A strategy that combines the per node results of a training barrier.
pub trait Aggregator: Send + Sync {
    /// Combines the parameters of all nodes into the global parameters.
    fn aggregate_parameters(
        &self,
        records: &[ParametersRecord],
    ) -> Result<ParametersRecord, AggregationError>;

    /// Combines the metrics of all nodes into the global metrics.
    fn aggregate_metrics(&self, records: &[MetricsRecord])
        -> Result<MetricsRecord, AggregationError>;
}

/// The unweighted mean.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanAggregator;

impl Aggregator for MeanAggregator {
    fn aggregate_parameters(
        &self,
        records: &[ParametersRecord],
    ) -> Result<ParametersRecord, AggregationError> {
        let mut aggregation = ParametersAggregation::new();
        for record in records {
            aggregation.validate_aggregation(record)?;
            aggregation.aggregate(record)?;
        }
        aggregation.mean()
    }

    fn aggregate_metrics(
        &self,
        records: &[MetricsRecord],
    ) -> Result<MetricsRecord, AggregationError> {
        let mut aggregation = MetricsAggregation::new();
        for record in records {
            aggregation.validate_aggregation(record)?;
            aggregation.aggregate(record);
        }
        aggregation.mean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(weight: &[f32], bias: &[f32]) -> ParametersRecord {
        vec![
            (
                "linear.weight",
                Array::from_values(vec![2, 2], weight).unwrap(),
            ),
            ("linear.bias", Array::from_values(vec![2], bias).unwrap()),
        ]
        .into_iter()
        .collect()
    }

    fn metrics(entries: &[(&str, f64)]) -> MetricsRecord {
        entries
            .iter()
            .map(|(key, value)| (*key, MetricValue::Float(*value)))
            .collect()
    }

    #[test]
    fn test_mean_of_parameters() {
        let records = vec![
            record(&[1.0, 2.0, 3.0, 4.0], &[0.0, -1.0]),
            record(&[3.0, 2.0, 1.0, 0.0], &[1.0, 1.0]),
        ];
        let mean = MeanAggregator.aggregate_parameters(&records).unwrap();
        assert_eq!(mean, record(&[2.0, 2.0, 2.0, 2.0], &[0.5, 0.0]));
    }

    #[test]
    fn test_parameters_mean_is_commutative() {
        let a = record(&[1.5, -2.25, 3.0, 4.75], &[0.125, -1.0]);
        let b = record(&[-3.0, 2.5, 1.0, 0.0], &[1.0, 8.0]);
        let c = record(&[0.5, 0.5, -0.5, 64.0], &[-2.0, 0.25]);

        let expected = MeanAggregator
            .aggregate_parameters(&[a.clone(), b.clone(), c.clone()])
            .unwrap();
        for permutation in &[
            vec![a.clone(), c.clone(), b.clone()],
            vec![b.clone(), a.clone(), c.clone()],
            vec![b.clone(), c.clone(), a.clone()],
            vec![c.clone(), a.clone(), b.clone()],
            vec![c.clone(), b.clone(), a.clone()],
        ] {
            assert_eq!(
                MeanAggregator.aggregate_parameters(permutation).unwrap(),
                expected
            );
        }
    }

    #[test]
    fn test_parameters_mean_is_idempotent() {
        let a = record(&[0.1, 0.2, 0.3, 0.7], &[1e-3, -5e4]);
        for n in 1..=5 {
            let copies = vec![a.clone(); n];
            assert_eq!(MeanAggregator.aggregate_parameters(&copies).unwrap(), a);
        }
    }

    #[test]
    fn test_int64_mean_is_exact() {
        let big = (1_i64 << 53) + 1;
        let a: ParametersRecord = vec![("step", Array::from_values(vec![1], &[big]).unwrap())]
            .into_iter()
            .collect();
        for n in 1..=3 {
            let copies = vec![a.clone(); n];
            assert_eq!(MeanAggregator.aggregate_parameters(&copies).unwrap(), a);
        }

        let b: ParametersRecord = vec![("step", Array::from_values(vec![1], &[big + 2]).unwrap())]
            .into_iter()
            .collect();
        let mean = MeanAggregator.aggregate_parameters(&[a, b]).unwrap();
        assert_eq!(mean.get("step").unwrap().to_values::<i64>().unwrap(), vec![big + 1]);
    }

    #[test]
    fn test_integer_mean_rounds_halves_up() {
        let record = |values: &[i32]| -> ParametersRecord {
            vec![("counts", Array::from_values(vec![2], values).unwrap())]
                .into_iter()
                .collect()
        };
        let mean = MeanAggregator
            .aggregate_parameters(&[record(&[1, -3]), record(&[2, -2])])
            .unwrap();
        assert_eq!(mean, record(&[2, -2]));
    }

    #[test]
    fn test_parameters_key_mismatch() {
        let a = record(&[1.0; 4], &[1.0; 2]);
        let mut b = a.clone();
        b.remove("linear.bias");
        b.insert("output.bias", Array::from_values(vec![2], &[1.0_f32; 2]).unwrap());

        assert!(matches!(
            MeanAggregator.aggregate_parameters(&[a.clone(), b.clone()]),
            Err(AggregationError::KeyMismatch { .. })
        ));

        let mut c = a.clone();
        c.remove("linear.bias");
        assert!(matches!(
            MeanAggregator.aggregate_parameters(&[a, c]),
            Err(AggregationError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn test_parameters_shape_and_type_mismatch() {
        let a = record(&[1.0; 4], &[1.0; 2]);

        let mut b = a.clone();
        b.insert(
            "linear.weight",
            Array::from_values(vec![4], &[1.0_f32; 4]).unwrap(),
        );
        assert_eq!(
            MeanAggregator.aggregate_parameters(&[a.clone(), b]),
            Err(AggregationError::ShapeMismatch {
                key: "linear.weight".to_string(),
                expected: vec![2, 2],
                found: vec![4],
            })
        );

        let mut c = a.clone();
        c.insert("linear.bias", Array::from_values(vec![2], &[1.0_f64; 2]).unwrap());
        assert_eq!(
            MeanAggregator.aggregate_parameters(&[a, c]),
            Err(AggregationError::DataTypeMismatch {
                key: "linear.bias".to_string(),
                expected: DataType::F32,
                found: DataType::F64,
            })
        );
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = record(&[1.0; 4], &[1.0; 2]);
        let reversed: ParametersRecord = a
            .clone()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .into_iter()
            .collect();
        assert_eq!(MeanAggregator.aggregate_parameters(&[a.clone(), reversed]).unwrap(), a);
    }

    #[test]
    fn test_nothing_to_aggregate() {
        assert_eq!(
            MeanAggregator.aggregate_parameters(&[]),
            Err(AggregationError::Empty)
        );
        assert_eq!(MeanAggregator.aggregate_metrics(&[]), Err(AggregationError::Empty));
    }

    #[test]
    fn test_metrics_mean() {
        assert_eq!(
            MeanAggregator
                .aggregate_metrics(&[metrics(&[("loss", 0.1)])])
                .unwrap(),
            metrics(&[("loss", 0.1)])
        );
        assert_eq!(
            MeanAggregator
                .aggregate_metrics(&[metrics(&[("loss", 0.1)]), metrics(&[("loss", 0.3)])])
                .unwrap(),
            metrics(&[("loss", 0.2)])
        );
    }

    #[test]
    fn test_integer_metrics_average_to_floats() {
        let records: Vec<MetricsRecord> = vec![
            vec![("correct", MetricValue::Int(3))].into_iter().collect(),
            vec![("correct", MetricValue::Int(4))].into_iter().collect(),
        ];
        assert_eq!(
            MeanAggregator.aggregate_metrics(&records).unwrap(),
            metrics(&[("correct", 3.5)])
        );
    }

    #[test]
    fn test_non_numeric_metric() {
        let records: Vec<MetricsRecord> = vec![
            metrics(&[("loss", 0.1)]),
            vec![("loss", MetricValue::FloatList(vec![0.1, 0.2]))]
                .into_iter()
                .collect(),
        ];
        assert_eq!(
            MeanAggregator.aggregate_metrics(&records),
            Err(AggregationError::NonNumericMetric("loss".to_string()))
        );
    }

    #[test]
    fn test_metrics_key_mismatch() {
        let records = vec![metrics(&[("loss", 0.1)]), metrics(&[("accuracy", 0.9)])];
        assert!(matches!(
            MeanAggregator.aggregate_metrics(&records),
            Err(AggregationError::KeyMismatch { .. })
        ));
    }
}
