//! Softmax regression on the iris dataset.
//!
//! The [`IrisModel`] is a single linear layer mapping the 4 measurements of a flower onto the
//! logits of its 3 classes. Its learner minimizes the cross-entropy with Adam on mini-batches,
//! one epoch per `train` call. The parameters are exchanged as `linear.weight` (`[3, 4]`) and
//! `linear.bias` (`[3]`), both `float32`.

use ndarray::{s, Array, Array1, Array2, ArrayView1, ArrayView2, Axis, Dimension, Ix1, Ix2, Zip};
use rand::{rngs::StdRng, Rng, SeedableRng};

use fedorch_core::{
    aggregation::{Aggregator, MeanAggregator},
    learner::{Dataset, LearnerError, LocalLearner},
    records::{Array as RecordArray, ArrayError, MetricValue, MetricsRecord, ParametersRecord},
    registry::FlModel,
};

pub const FEATURES: usize = 4;
pub const CLASSES: usize = 3;
pub const LABELS: [&str; CLASSES] = ["Iris-setosa", "Iris-versicolor", "Iris-virginica"];

const WEIGHT: &str = "linear.weight";
const BIAS: &str = "linear.bias";

const LEARNING_RATE: f32 = 0.001;
const BATCH_SIZE: usize = 32;
const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-8;

/// Gets the class index of an iris label.
pub fn label_index(label: &str) -> Option<usize> {
    LABELS.iter().position(|known| *known == label)
}

/// The iris model definition. Every learner starts from the same initial parameters.
#[derive(Debug, Clone)]
pub struct IrisModel {
    initial: ParametersRecord,
}

impl IrisModel {
    /// Creates the model with parameters drawn uniformly from `[-0.5, 0.5)`.
    pub fn new(seed: u64) -> Result<Self, ArrayError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let weight = Array2::from_shape_fn((CLASSES, FEATURES), |_| rng.gen_range(-0.5..0.5));
        let bias = Array1::from_shape_fn(CLASSES, |_| rng.gen_range(-0.5..0.5));
        Ok(Self {
            initial: Layer { weight, bias }.to_parameters()?,
        })
    }
}

impl FlModel for IrisModel {
    fn create_learner(&self) -> Box<dyn LocalLearner> {
        Box::new(IrisLearner::new(self.initial.clone()))
    }

    fn create_aggregator(&self) -> Box<dyn Aggregator> {
        Box::new(MeanAggregator)
    }
}

/// The linear layer. Row `c` of the weight holds the coefficients of class `c`.
#[derive(Debug, Clone, PartialEq)]
struct Layer {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Layer {
    fn from_parameters(parameters: &ParametersRecord) -> Result<Self, LearnerError> {
        if parameters.len() != 2 {
            return Err(LearnerError::InvalidParameters(format!(
                "expected `{}` and `{}`, got {} parameters",
                WEIGHT,
                BIAS,
                parameters.len()
            )));
        }
        let weight = Array2::from_shape_vec(
            (CLASSES, FEATURES),
            read_parameter(parameters, WEIGHT, &[CLASSES, FEATURES])?,
        );
        let bias = Array1::from_shape_vec(CLASSES, read_parameter(parameters, BIAS, &[CLASSES])?);
        match (weight, bias) {
            (Ok(weight), Ok(bias)) => Ok(Self { weight, bias }),
            (Err(err), _) | (_, Err(err)) => Err(LearnerError::InvalidParameters(err.to_string())),
        }
    }

    fn to_parameters(&self) -> Result<ParametersRecord, ArrayError> {
        Ok(ParametersRecord::new()
            .with(
                WEIGHT,
                RecordArray::from_values(vec![CLASSES, FEATURES], &row_major(&self.weight))?,
            )
            .with(
                BIAS,
                RecordArray::from_values(vec![CLASSES], &row_major(&self.bias))?,
            ))
    }

    /// Gets the class probabilities, one row per sample.
    fn probabilities(&self, features: ArrayView2<f32>) -> Array2<f32> {
        let mut logits = features.dot(&self.weight.t()) + &self.bias;
        for mut row in logits.outer_iter_mut() {
            let max = row.fold(f32::NEG_INFINITY, |max, logit| max.max(*logit));
            row.mapv_inplace(|logit| (logit - max).exp());
            let sum = row.sum();
            row /= sum;
        }
        logits
    }
}

/// Adam moments of one parameter.
#[derive(Debug, Clone)]
struct Moments<D: Dimension> {
    m: Array<f32, D>,
    v: Array<f32, D>,
}

impl<D: Dimension> Moments<D> {
    fn zeros(shape: D) -> Self {
        Self {
            m: Array::zeros(shape.clone()),
            v: Array::zeros(shape),
        }
    }

    fn step(
        &mut self,
        value: &mut Array<f32, D>,
        gradient: &Array<f32, D>,
        (m_correction, v_correction): (f32, f32),
    ) {
        Zip::from(value)
            .and(&mut self.m)
            .and(&mut self.v)
            .and(gradient)
            .for_each(|value, m, v, &g| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                let (m_hat, v_hat) = (*m / m_correction, *v / v_correction);
                *value -= LEARNING_RATE * m_hat / (v_hat.sqrt() + EPSILON);
            });
    }
}

#[derive(Debug, Clone)]
struct Adam {
    weight: Moments<Ix2>,
    bias: Moments<Ix1>,
    t: i32,
}

impl Adam {
    fn new() -> Self {
        Self {
            weight: Moments::zeros(Ix2(CLASSES, FEATURES)),
            bias: Moments::zeros(Ix1(CLASSES)),
            t: 0,
        }
    }

    fn step(
        &mut self,
        layer: &mut Layer,
        weight_gradient: &Array2<f32>,
        bias_gradient: &Array1<f32>,
    ) {
        self.t += 1;
        let corrections = (1.0 - BETA1.powi(self.t), 1.0 - BETA2.powi(self.t));
        self.weight.step(&mut layer.weight, weight_gradient, corrections);
        self.bias.step(&mut layer.bias, bias_gradient, corrections);
    }
}

/// The measurements, one row per flower, and the class indices of a dataset.
#[derive(Debug, Clone)]
struct Samples {
    features: Array2<f32>,
    labels: Vec<usize>,
}

/// The learner of the [`IrisModel`].
#[derive(Debug, Clone)]
pub struct IrisLearner {
    parameters: ParametersRecord,
    optimizer: Adam,
    samples: Option<Samples>,
}

impl IrisLearner {
    pub fn new(parameters: ParametersRecord) -> Self {
        Self {
            parameters,
            optimizer: Adam::new(),
            samples: None,
        }
    }

    fn samples(&self) -> Result<&Samples, LearnerError> {
        self.samples.as_ref().ok_or(LearnerError::NoData)
    }
}

impl LocalLearner for IrisLearner {
    fn prepare_data(&mut self, data: &Dataset) -> Result<(), LearnerError> {
        if data.columns().len() != FEATURES + 1 {
            return Err(LearnerError::InvalidData(format!(
                "expected {} features and a label, got {} columns",
                FEATURES,
                data.columns().len()
            )));
        }
        if data.is_empty() {
            return Err(LearnerError::InvalidData("empty dataset".to_string()));
        }

        let mut features = Vec::with_capacity(data.len() * FEATURES);
        let mut labels = Vec::with_capacity(data.len());
        for (i, row) in data.rows().iter().enumerate() {
            let label = parse_sample(row, &mut features)
                .map_err(|reason| LearnerError::InvalidData(format!("row {}: {}", i, reason)))?;
            labels.push(label);
        }
        let features = Array2::from_shape_vec((labels.len(), FEATURES), features)
            .map_err(|err| LearnerError::InvalidData(err.to_string()))?;
        self.samples = Some(Samples { features, labels });
        Ok(())
    }

    fn train(&mut self) -> Result<MetricsRecord, LearnerError> {
        let samples = self.samples()?;
        let mut layer = Layer::from_parameters(&self.parameters)?;
        let mut optimizer = self.optimizer.clone();
        let mut total_loss = 0.0;

        for start in (0..samples.labels.len()).step_by(BATCH_SIZE) {
            let end = (start + BATCH_SIZE).min(samples.labels.len());
            let features = samples.features.slice(s![start..end, ..]);
            let labels = &samples.labels[start..end];

            // the gradient of the cross-entropy w.r.t. the logits
            let mut delta = layer.probabilities(features);
            for (mut row, label) in delta.outer_iter_mut().zip(labels) {
                total_loss -= f64::from(row[*label].max(f32::MIN_POSITIVE).ln());
                row[*label] -= 1.0;
            }
            let scale = 1.0 / labels.len() as f32;
            let weight_gradient = delta.t().dot(&features) * scale;
            let bias_gradient = delta.sum_axis(Axis(0)) * scale;
            optimizer.step(&mut layer, &weight_gradient, &bias_gradient);
        }

        let loss = total_loss / samples.labels.len() as f64;
        self.parameters = layer.to_parameters()?;
        self.optimizer = optimizer;
        Ok(MetricsRecord::new().with("loss", MetricValue::Float(loss)))
    }

    fn evaluate(&self) -> Result<MetricsRecord, LearnerError> {
        let samples = self.samples()?;
        let layer = Layer::from_parameters(&self.parameters)?;
        let correct = layer
            .probabilities(samples.features.view())
            .outer_iter()
            .zip(&samples.labels)
            .filter(|(probabilities, label)| argmax(probabilities.view()) == **label)
            .count();
        let accuracy = correct as f64 / samples.labels.len() as f64;
        Ok(MetricsRecord::new().with("accuracy", MetricValue::Float(accuracy)))
    }

    fn get_parameters(&self) -> ParametersRecord {
        self.parameters.clone()
    }

    fn set_parameters(&mut self, parameters: &ParametersRecord) -> Result<(), LearnerError> {
        Layer::from_parameters(parameters)?;
        self.parameters = parameters.clone();
        Ok(())
    }
}

/// Appends the measurements of a row to `features` and gets its class index.
fn parse_sample(row: &[String], features: &mut Vec<f32>) -> Result<usize, String> {
    let mut measurements = [0.0; FEATURES];
    for (measurement, field) in measurements.iter_mut().zip(row) {
        *measurement = field
            .parse()
            .map_err(|_| format!("{:?} is not a measurement", field))?;
    }
    let label = row
        .get(FEATURES)
        .and_then(|label| label_index(label))
        .ok_or_else(|| format!("unknown label {:?}", row.get(FEATURES)))?;
    features.extend_from_slice(&measurements);
    Ok(label)
}

fn read_parameter(
    parameters: &ParametersRecord,
    key: &str,
    shape: &[usize],
) -> Result<Vec<f32>, LearnerError> {
    let array = parameters
        .get(key)
        .ok_or_else(|| LearnerError::InvalidParameters(format!("missing `{}`", key)))?;
    if array.shape() != shape {
        return Err(LearnerError::InvalidParameters(format!(
            "`{}` has shape {:?}, expected {:?}",
            key,
            array.shape(),
            shape
        )));
    }
    Ok(array.to_values::<f32>()?)
}

fn row_major<D: Dimension>(tensor: &Array<f32, D>) -> Vec<f32> {
    tensor.iter().copied().collect()
}

fn argmax(probabilities: ArrayView1<f32>) -> usize {
    probabilities
        .indexed_iter()
        .fold((0, f32::NEG_INFINITY), |best, (class, probability)| {
            if *probability > best.1 {
                (class, *probability)
            } else {
                best
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use fedorch_client::data::{load_dataset, parse_csv};

    use super::*;

    fn iris() -> Dataset {
        load_dataset("iris", Path::new("data/iris.csv")).unwrap()
    }

    fn learner() -> Box<dyn LocalLearner> {
        IrisModel::new(7).unwrap().create_learner()
    }

    fn loss(metrics: &MetricsRecord) -> f64 {
        metrics.get("loss").and_then(MetricValue::as_scalar).unwrap()
    }

    #[test]
    fn test_label_index() {
        assert_eq!(label_index("Iris-setosa"), Some(0));
        assert_eq!(label_index("Iris-virginica"), Some(2));
        assert_eq!(label_index("iris-setosa"), None);
    }

    #[test]
    fn test_initial_parameters() {
        let parameters = learner().get_parameters();
        let weight = parameters.get(WEIGHT).unwrap();
        assert_eq!(weight.shape(), &[3, 4]);
        assert_eq!(parameters.get(BIAS).unwrap().shape(), &[3]);
        assert!(weight
            .to_values::<f32>()
            .unwrap()
            .iter()
            .all(|value| (-0.5..0.5).contains(value)));
        assert_eq!(parameters, IrisModel::new(7).unwrap().create_learner().get_parameters());
    }

    #[test]
    fn test_training_lowers_the_loss() {
        let mut learner = learner();
        learner.prepare_data(&iris()).unwrap();

        let first = loss(&learner.train().unwrap());
        let mut last = first;
        for _ in 0..100 {
            last = loss(&learner.train().unwrap());
        }
        assert!(last < first, "loss went from {} to {}", first, last);

        let accuracy = learner
            .evaluate()
            .unwrap()
            .get("accuracy")
            .and_then(MetricValue::as_scalar)
            .unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
    }

    #[test]
    fn test_unprepared_learner_has_no_data() {
        let mut learner = learner();
        assert!(matches!(learner.train(), Err(LearnerError::NoData)));
        assert!(matches!(learner.evaluate(), Err(LearnerError::NoData)));
    }

    #[test]
    fn test_invalid_data_is_rejected() {
        let mut learner = learner();
        let unknown_label = parse_csv("a,b,c,d,class\n1,2,3,4,Iris-unknown\n").unwrap();
        assert!(matches!(
            learner.prepare_data(&unknown_label),
            Err(LearnerError::InvalidData(_))
        ));
        let too_few_columns = parse_csv("a,class\n1,Iris-setosa\n").unwrap();
        assert!(matches!(
            learner.prepare_data(&too_few_columns),
            Err(LearnerError::InvalidData(_))
        ));
        assert!(matches!(learner.train(), Err(LearnerError::NoData)));
    }

    #[test]
    fn test_incompatible_parameters_are_rejected() {
        let mut learner = learner();
        let before = learner.get_parameters();
        let wrong_shape = ParametersRecord::new()
            .with(WEIGHT, RecordArray::from_values(vec![4, 3], &[0.0_f32; 12]).unwrap())
            .with(BIAS, RecordArray::from_values(vec![3], &[0.0_f32; 3]).unwrap());
        assert!(matches!(
            learner.set_parameters(&wrong_shape),
            Err(LearnerError::InvalidParameters(_))
        ));
        let wrong_type = ParametersRecord::new()
            .with(WEIGHT, RecordArray::from_values(vec![3, 4], &[0.0_f64; 12]).unwrap())
            .with(BIAS, RecordArray::from_values(vec![3], &[0.0_f32; 3]).unwrap());
        assert!(learner.set_parameters(&wrong_type).is_err());
        assert_eq!(learner.get_parameters(), before);
    }

    fn filled(value: f32) -> Layer {
        Layer {
            weight: Array2::from_elem((CLASSES, FEATURES), value),
            bias: Array1::from_elem(CLASSES, value),
        }
    }

    #[test]
    fn test_aggregator_is_the_mean() {
        let model = IrisModel::new(7).unwrap();
        let zeros = filled(0.0).to_parameters().unwrap();
        let twos = filled(2.0).to_parameters().unwrap();
        let mean = model
            .create_aggregator()
            .aggregate_parameters(&[zeros, twos])
            .unwrap();
        assert_eq!(Layer::from_parameters(&mean).unwrap(), filled(1.0));
    }

    #[test]
    fn test_uniform_layer_predicts_uniformly() {
        let features = Array2::from_shape_vec(
            (2, FEATURES),
            vec![5.1, 3.5, 1.4, 0.2, 6.3, 3.3, 6.0, 2.5],
        )
        .unwrap();
        let probabilities = filled(0.0).probabilities(features.view());
        assert_eq!(probabilities.dim(), (2, CLASSES));
        assert!(probabilities.iter().all(|p| (p - 1.0 / 3.0).abs() < 1e-6));
    }
}
