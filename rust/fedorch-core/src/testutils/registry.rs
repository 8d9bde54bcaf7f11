use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    aggregation::{Aggregator, MeanAggregator},
    learner::{Dataset, LearnerError, LocalLearner},
    records::{Array, MetricValue, MetricsRecord, ParametersRecord},
    registry::{trained_model_name, FlModel, ModelInfo, ModelRegistry, RegistryError},
    testutils::records::parameters,
    tracking::RunConfig,
};

/// A learner whose training adds a fixed step to every parameter.
///
/// Training reports a `loss` of `1 / (number of local passes)`, which makes the aggregated
/// metrics of a round easy to predict.
#[derive(Debug, Clone)]
pub struct ShiftLearner {
    step: f32,
    parameters: ParametersRecord,
    samples: Option<usize>,
    passes: u32,
}

impl ShiftLearner {
    pub fn new(step: f32) -> Self {
        Self {
            step,
            parameters: parameters(0.0),
            samples: None,
            passes: 0,
        }
    }
}

impl LocalLearner for ShiftLearner {
    fn prepare_data(&mut self, data: &Dataset) -> Result<(), LearnerError> {
        if data.is_empty() {
            return Err(LearnerError::InvalidData("empty dataset".to_string()));
        }
        self.samples = Some(data.len());
        Ok(())
    }

    fn train(&mut self) -> Result<MetricsRecord, LearnerError> {
        self.samples.ok_or(LearnerError::NoData)?;
        let mut shifted = ParametersRecord::new();
        for (key, array) in self.parameters.iter() {
            let values: Vec<f64> = array
                .to_f64_values()
                .into_iter()
                .map(|value| value + f64::from(self.step))
                .collect();
            let array = Array::from_f64_values(array.dtype(), array.shape().to_vec(), &values)?;
            shifted.insert(key, array);
        }
        self.parameters = shifted;
        self.passes += 1;
        Ok(MetricsRecord::new().with("loss", MetricValue::Float(1.0 / f64::from(self.passes))))
    }

    fn evaluate(&self) -> Result<MetricsRecord, LearnerError> {
        self.samples.ok_or(LearnerError::NoData)?;
        Ok(MetricsRecord::new().with("accuracy", MetricValue::Float(1.0)))
    }

    fn get_parameters(&self) -> ParametersRecord {
        self.parameters.clone()
    }

    fn set_parameters(&mut self, parameters: &ParametersRecord) -> Result<(), LearnerError> {
        let compatible = self.parameters.has_same_keys(parameters)
            && self.parameters.iter().all(|(key, current)| {
                parameters.get(key).map_or(false, |new| {
                    new.shape() == current.shape() && new.dtype() == current.dtype()
                })
            });
        if !compatible {
            return Err(LearnerError::InvalidParameters(
                "expected the parameters of a 4 to 3 linear layer".to_string(),
            ));
        }
        self.parameters = parameters.clone();
        Ok(())
    }
}

/// The model of [`ShiftLearner`]s, aggregated with the mean.
#[derive(Debug, Clone, Copy)]
pub struct ShiftModel {
    pub step: f32,
}

impl FlModel for ShiftModel {
    fn create_learner(&self) -> Box<dyn LocalLearner> {
        Box::new(ShiftLearner::new(self.step))
    }

    fn create_aggregator(&self) -> Box<dyn Aggregator> {
        Box::new(MeanAggregator)
    }
}

/// A model uploaded to a [`MemoryRegistry`].
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub info: ModelInfo,
    pub parameters: ParametersRecord,
}

/// A model registry keeping its models in memory.
#[derive(Default)]
pub struct MemoryRegistry {
    models: Mutex<HashMap<(String, i64), Arc<dyn FlModel>>>,
    uploads: Mutex<Vec<Upload>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model, builder style.
    pub fn with_model(self, name: &str, version: i64, model: impl FlModel + 'static) -> Self {
        self.register(name, version, Arc::new(model));
        self
    }

    pub fn register(&self, name: &str, version: i64, model: Arc<dyn FlModel>) {
        self.models
            .lock()
            .unwrap()
            .insert((name.to_string(), version), model);
    }

    /// Gets the uploaded models in upload order.
    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelRegistry for MemoryRegistry {
    async fn load_model(&self, name: &str, version: i64) -> Result<Arc<dyn FlModel>, RegistryError> {
        self.models
            .lock()
            .unwrap()
            .get(&(name.to_string(), version))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
                version,
            })
    }

    async fn upload_final_state(
        &self,
        run: &RunConfig,
        learner: &dyn LocalLearner,
    ) -> Result<ModelInfo, RegistryError> {
        let mut uploads = self.uploads.lock().unwrap();
        let name = trained_model_name(&run.model_name);
        let version = uploads.iter().filter(|u| u.info.name == name).count() as i64 + 1;
        let info = ModelInfo {
            model_id: format!("{}/{}", name, version),
            uri: format!("models:/{}/{}", name, version),
            run_id: run.parent_run_id.clone(),
            name,
            version,
        };
        uploads.push(Upload {
            info: info.clone(),
            parameters: learner.get_parameters(),
        });
        Ok(info)
    }
}
