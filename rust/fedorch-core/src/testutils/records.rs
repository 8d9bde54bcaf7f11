use crate::records::{Array, MetricValue, MetricsRecord, ParametersRecord};

/// The parameters of a 4 to 3 linear layer with every element set to `value`.
pub fn parameters(value: f32) -> ParametersRecord {
    ParametersRecord::new()
        .with(
            "linear.weight",
            Array::from_values(vec![3, 4], &[value; 12]).unwrap(),
        )
        .with("linear.bias", Array::from_values(vec![3], &[value; 3]).unwrap())
}

/// A metrics record with a single `loss` entry.
pub fn metrics(loss: f64) -> MetricsRecord {
    MetricsRecord::new().with("loss", MetricValue::Float(loss))
}
