//! The stage handlers of a node.
//!
//! A [`StageHandler`] decodes the [`Instruction`] of a request, performs it on the
//! [`ClientSession`] and builds the content of the reply. A request whose fields don't decode is
//! rejected before anything is touched.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use fedorch_core::{
    instruction::{Instruction, InstructionError},
    learner::LearnerError,
    message::{ErrorCode, Message, RemoteError},
    records::{ParametersRecord, RecordSet},
    registry::{ModelRegistry, RegistryError},
    reply,
    tracking::{dataset_source, finish_runs, RunConfig, RunScopeError, Tracker, TrackingError},
};

use crate::{
    data::{load_dataset, DataError},
    session::{ClientSession, ModelMeta},
};

/// Errors which can occur while a node performs a stage.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("the request carries no content")]
    NoContent,

    #[error(transparent)]
    Instruction(#[from] InstructionError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("no data has been loaded")]
    NoData,

    #[error("no model has been loaded")]
    NoLearner,

    #[error("learner failed: {0}")]
    Learner(#[from] LearnerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error("run configuration: {0}")]
    Scope(#[from] RunScopeError),
}

impl HandlerError {
    /// Gets the class of the error as reported to the coordinator.
    pub fn code(&self) -> ErrorCode {
        match self {
            HandlerError::NoContent | HandlerError::Instruction(InstructionError::Field(_)) => {
                ErrorCode::Validation
            }
            HandlerError::Instruction(_) | HandlerError::Data(DataError::UnsupportedUseCase(_)) => {
                ErrorCode::Unsupported
            }
            _ => ErrorCode::Internal,
        }
    }

    /// Converts the error into the transport-level error of a reply.
    pub fn to_remote(&self) -> RemoteError {
        RemoteError::new(self.code(), self.to_string())
    }
}

/// Performs the stages of a round on the session of a node.
pub struct StageHandler {
    session: ClientSession,
    tracker: Arc<dyn Tracker>,
    registry: Arc<dyn ModelRegistry>,
}

impl StageHandler {
    pub fn new(
        session: ClientSession,
        tracker: Arc<dyn Tracker>,
        registry: Arc<dyn ModelRegistry>,
    ) -> Self {
        Self {
            session,
            tracker,
            registry,
        }
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Handles a request and returns the content of the reply.
    ///
    /// # Errors
    /// Fails if the request doesn't carry a valid instruction or if the stage failed.
    pub async fn handle(&mut self, request: &Message) -> Result<RecordSet, HandlerError> {
        let content = request.content().ok_or(HandlerError::NoContent)?;
        let instruction = Instruction::decode(request.metadata().message_type, content)?;
        debug!("performing {:?}", instruction);
        self.perform(instruction).await
    }

    /// Performs one stage.
    pub async fn perform(&mut self, instruction: Instruction) -> Result<RecordSet, HandlerError> {
        match instruction {
            Instruction::FilterClients { use_case } => Ok(self.filter_clients(&use_case)),
            Instruction::LoadData { use_case } => self.load_data(&use_case),
            Instruction::LoadModel {
                model_name,
                model_version,
            } => self.load_model(model_name, model_version).await,
            Instruction::PrepareData => self.prepare_data(),
            Instruction::SetRunConfig {
                experiment_id,
                run_id,
                model_name,
                model_version,
            } => {
                self.set_run_config(experiment_id, run_id, model_name, model_version)
                    .await
            }
            Instruction::GetParameters => self.get_parameters(),
            Instruction::SetParameters { parameters } => self.set_parameters(&parameters),
            Instruction::Train {
                parameters,
                current_global_iter,
            } => self.train(&parameters, current_global_iter).await,
            Instruction::UploadModel { parameters } => self.upload_model(&parameters).await,
            Instruction::CleanConfig => self.clean_config().await,
        }
    }

    fn filter_clients(&self, use_case: &str) -> RecordSet {
        let participate = use_case == self.session.settings.use_case;
        info!(
            "{} in the round of use case {}",
            if participate { "taking part" } else { "not taking part" },
            use_case
        );
        reply::participate(participate)
    }

    fn load_data(&mut self, use_case: &str) -> Result<RecordSet, HandlerError> {
        let data = load_dataset(use_case, &self.session.settings.data_path)?;
        info!("loaded {} samples", data.len());
        self.session.data = Some(data);
        Ok(reply::success("data loaded"))
    }

    async fn load_model(&mut self, name: String, version: i64) -> Result<RecordSet, HandlerError> {
        let model = self.registry.load_model(&name, version).await?;
        self.session.learner = Some(model.create_learner());
        info!("loaded model {} version {}", name, version);
        self.session.model = Some(ModelMeta { name, version });
        Ok(reply::success("model loaded"))
    }

    fn prepare_data(&mut self) -> Result<RecordSet, HandlerError> {
        let data = self.session.data.as_ref().ok_or(HandlerError::NoData)?;
        let learner = self
            .session
            .learner
            .as_mut()
            .ok_or(HandlerError::NoLearner)?;
        learner.prepare_data(data)?;
        Ok(reply::success("data prepared"))
    }

    async fn set_run_config(
        &mut self,
        experiment_id: String,
        parent_run_id: String,
        model_name: String,
        model_version: i64,
    ) -> Result<RecordSet, HandlerError> {
        if self.session.scope.is_set() {
            return Err(RunScopeError::AlreadyConfigured.into());
        }
        let child_run_id = self
            .tracker
            .create_child_run(&experiment_id, &parent_run_id, self.session.name())
            .await?;
        let source = dataset_source(
            self.session.name(),
            &self.session.settings.data_path.to_string_lossy(),
        );
        self.tracker
            .set_dataset_signature(&child_run_id, &source)
            .await?;
        self.session.scope.set(RunConfig {
            experiment_id,
            parent_run_id,
            child_run_id,
            model_name,
            model_version,
        })?;
        Ok(reply::success("run configured"))
    }

    fn get_parameters(&self) -> Result<RecordSet, HandlerError> {
        let learner = self
            .session
            .learner
            .as_ref()
            .ok_or(HandlerError::NoLearner)?;
        Ok(reply::parameters(learner.get_parameters()))
    }

    fn set_parameters(&mut self, parameters: &ParametersRecord) -> Result<RecordSet, HandlerError> {
        let learner = self
            .session
            .learner
            .as_mut()
            .ok_or(HandlerError::NoLearner)?;
        learner.set_parameters(parameters)?;
        Ok(reply::success("parameters set"))
    }

    async fn train(
        &mut self,
        parameters: &ParametersRecord,
        iteration: u32,
    ) -> Result<RecordSet, HandlerError> {
        let run_id = self.session.scope.current()?.child_run_id.clone();
        let learner = self
            .session
            .learner
            .as_mut()
            .ok_or(HandlerError::NoLearner)?;
        learner.set_parameters(parameters)?;
        let metrics = learner.train()?;
        self.tracker.log_metrics(&run_id, &metrics, iteration).await?;
        info!("trained in iteration {}", iteration);
        Ok(reply::train(learner.get_parameters(), metrics))
    }

    async fn upload_model(&mut self, parameters: &ParametersRecord) -> Result<RecordSet, HandlerError> {
        let run = self.session.scope.current()?.clone();
        let learner = self
            .session
            .learner
            .as_mut()
            .ok_or(HandlerError::NoLearner)?;
        learner.set_parameters(parameters)?;
        let info = self
            .registry
            .upload_final_state(&run, &**learner)
            .await?;
        info!("uploaded model {}", info.model_id);
        Ok(reply::upload(&info.model_id, &info.run_id))
    }

    async fn clean_config(&mut self) -> Result<RecordSet, HandlerError> {
        let run = self.session.scope.take()?;
        finish_runs(self.tracker.as_ref(), &run, false).await?;
        Ok(reply::success("run finished"))
    }
}

#[cfg(test)]
mod tests {
    use fedorch_core::{
        message::MessageType,
        records::{ConfigValue, FieldError},
        testutils::{
            records::parameters,
            registry::{MemoryRegistry, ShiftModel},
            tracking::MemoryTracker,
        },
    };

    use super::*;
    use crate::{
        settings::NodeSettings,
        testutils::{enable_logging, raw_request, request},
    };

    struct Node {
        handler: StageHandler,
        tracker: Arc<MemoryTracker>,
        registry: Arc<MemoryRegistry>,
    }

    fn node() -> Node {
        enable_logging();
        let tracker = Arc::new(MemoryTracker::new());
        let registry =
            Arc::new(MemoryRegistry::new().with_model("iris", 1, ShiftModel { step: 1.0 }));
        let session = ClientSession::new(NodeSettings::new("node-1", "../e2e/data/iris.csv"));
        Node {
            handler: StageHandler::new(session, tracker.clone(), registry.clone()),
            tracker,
            registry,
        }
    }

    async fn perform(node: &mut Node, instruction: Instruction) -> RecordSet {
        node.handler.handle(&request(instruction)).await.unwrap()
    }

    /// Loads data and model and opens the run of the node, returns the id of the parent run.
    async fn configured(node: &mut Node) -> String {
        perform(
            node,
            Instruction::LoadData {
                use_case: "iris".to_string(),
            },
        )
        .await;
        perform(
            node,
            Instruction::LoadModel {
                model_name: "iris".to_string(),
                model_version: 1,
            },
        )
        .await;
        perform(node, Instruction::PrepareData).await;
        let (experiment_id, parent_run_id) = node
            .tracker
            .create_run("experiment", "run")
            .await
            .unwrap();
        perform(
            node,
            Instruction::SetRunConfig {
                experiment_id,
                run_id: parent_run_id.clone(),
                model_name: "iris".to_string(),
                model_version: 1,
            },
        )
        .await;
        parent_run_id
    }

    fn current_parameters(node: &Node) -> ParametersRecord {
        node.handler
            .session()
            .learner
            .as_ref()
            .unwrap()
            .get_parameters()
    }

    #[tokio::test]
    async fn test_filter_clients() {
        let mut node = node();
        let participate = |content: RecordSet| reply::read_participate(&content).unwrap();
        let content = perform(
            &mut node,
            Instruction::FilterClients {
                use_case: "iris".to_string(),
            },
        )
        .await;
        assert!(participate(content));
        let content = perform(
            &mut node,
            Instruction::FilterClients {
                use_case: "mnist".to_string(),
            },
        )
        .await;
        assert!(!participate(content));
        assert!(node.handler.session().data.is_none());
    }

    #[tokio::test]
    async fn test_round_of_a_node() {
        let mut node = node();
        let parent_run_id = configured(&mut node).await;

        let child = node.tracker.children_of(&parent_run_id).remove(0);
        assert_eq!(child.name, "node-1");
        assert_eq!(
            child.dataset_source.as_deref(),
            Some("node-1://../e2e/data/iris.csv")
        );

        let content = perform(
            &mut node,
            Instruction::SetParameters {
                parameters: parameters(0.5),
            },
        )
        .await;
        assert!(reply::read_success(&content).unwrap());

        let content = perform(
            &mut node,
            Instruction::Train {
                parameters: parameters(2.0),
                current_global_iter: 2,
            },
        )
        .await;
        let (trained, metrics) = reply::read_train(&content).unwrap();
        assert_eq!(trained, parameters(3.0));
        let child = node.tracker.run(&child.run_id).unwrap();
        assert_eq!(child.metrics, vec![(2, metrics)]);

        let content = perform(
            &mut node,
            Instruction::UploadModel {
                parameters: parameters(4.0),
            },
        )
        .await;
        let receipt = reply::read_upload(&content).unwrap();
        assert_eq!(receipt.model_id, "trained_iris/1");
        assert_eq!(receipt.run_id, parent_run_id);
        let uploads = node.registry.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].parameters, parameters(4.0));

        perform(&mut node, Instruction::CleanConfig).await;
        assert!(node.tracker.run(&child.run_id).unwrap().finished);
        assert!(!node.tracker.run(&parent_run_id).unwrap().finished);
        assert!(!node.handler.session().scope.is_set());
    }

    #[tokio::test]
    async fn test_mistyped_iteration_fails_without_training() {
        let mut node = node();
        configured(&mut node).await;
        let before = current_parameters(&node);

        let mut content = Instruction::Train {
            parameters: parameters(2.0),
            current_global_iter: 0,
        }
        .into_record_set();
        let mut config = content.config().unwrap().clone();
        config.insert("current_global_iter", ConfigValue::from("0"));
        content = content.with_config(config);
        let request = raw_request(MessageType::Train, content);

        let err = node.handler.handle(&request).await.unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Instruction(InstructionError::Field(FieldError::TypeMismatch { .. }))
        ));
        assert_eq!(err.code(), ErrorCode::Validation);
        assert_eq!(current_parameters(&node), before);
        assert!(node
            .tracker
            .runs()
            .iter()
            .all(|run| run.metrics.is_empty()));
    }

    #[tokio::test]
    async fn test_unsupported_requests() {
        let mut node = node();
        let err = node
            .handler
            .perform(Instruction::LoadData {
                use_case: "mnist".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unsupported);
        assert!(node.handler.session().data.is_none());

        let evaluate = raw_request(MessageType::Evaluate, RecordSet::new());
        let err = node.handler.handle(&evaluate).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unsupported);
        assert_eq!(
            err.to_remote().reason,
            "evaluate messages carry no instruction"
        );
    }

    #[tokio::test]
    async fn test_stages_out_of_order() {
        let mut node = node();
        let err = node
            .handler
            .perform(Instruction::PrepareData)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NoData));
        assert_eq!(err.code(), ErrorCode::Internal);

        node.handler
            .perform(Instruction::LoadData {
                use_case: "iris".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(
            node.handler.perform(Instruction::PrepareData).await,
            Err(HandlerError::NoLearner)
        ));
        assert!(matches!(
            node.handler.perform(Instruction::CleanConfig).await,
            Err(HandlerError::Scope(RunScopeError::NotConfigured))
        ));
    }

    #[tokio::test]
    async fn test_training_requires_a_run() {
        let mut node = node();
        perform(
            &mut node,
            Instruction::LoadModel {
                model_name: "iris".to_string(),
                model_version: 1,
            },
        )
        .await;
        let before = current_parameters(&node);
        let err = node
            .handler
            .perform(Instruction::Train {
                parameters: parameters(1.0),
                current_global_iter: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Scope(RunScopeError::NotConfigured)
        ));
        assert_eq!(current_parameters(&node), before);
    }

    #[tokio::test]
    async fn test_run_is_configured_once() {
        let mut node = node();
        let parent_run_id = configured(&mut node).await;
        let err = node
            .handler
            .perform(Instruction::SetRunConfig {
                experiment_id: "1".to_string(),
                run_id: parent_run_id.clone(),
                model_name: "iris".to_string(),
                model_version: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Scope(RunScopeError::AlreadyConfigured)
        ));
        assert_eq!(node.tracker.children_of(&parent_run_id).len(), 1);
    }
}
