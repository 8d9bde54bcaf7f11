//! Barriers of a round.
//!
//! Every operation of a round is a barrier: [`RoundFlow::execution_flow()`] sends one
//! [`Instruction`] to a set of nodes and waits until each of them replied. The operation specific
//! helpers on top of it turn the replies into the values the round goes on with.
//!
//! Replies of stages whose success is checked are validated by [`check_success()`]. A reply
//! without a boolean `success` field is always fatal. Whether a node which failed, by reporting
//! a transport error or `success = false`, aborts the round is decided by
//! [`RoundSettings::abort_on_failure`].

use std::sync::Arc;

use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;

use fedorch_core::{
    instruction::{Instruction, Stage},
    message::Message,
    records::{FieldError, MetricsRecord, ParametersRecord},
    reply::{self, UploadReceipt},
    NodeId,
};

use crate::{
    driver::{self, Driver, DriverError},
    settings::{DriverSettings, RoundSettings},
};

/// Errors of a barrier.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("malformed reply of node {node_id}: {source}")]
    MalformedReply {
        node_id: NodeId,
        #[source]
        source: FieldError,
    },

    #[error("{failed} of {total} nodes failed to {stage}")]
    StageFailed {
        stage: Stage,
        failed: usize,
        total: usize,
    },

    #[error("no node left to {0}")]
    NoNodes(Stage),

    #[error("no node succeeded to {0}")]
    NoSuccess(Stage),
}

/// The outcome of a checked stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuccessReport {
    /// The nodes which replied `success = true`, in arrival order.
    pub succeeded: Vec<NodeId>,
    /// The nodes which reported an error or replied `success = false`, with the reason.
    pub failed: Vec<(NodeId, String)>,
}

impl SuccessReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Checks the replies of a stage.
///
/// Transport errors and unsuccessful replies are logged and reported, they are not errors.
///
/// # Errors
/// Fails if a reply with content doesn't carry a boolean `success` field.
pub fn check_success(replies: &[Message]) -> Result<SuccessReport, FlowError> {
    let mut report = SuccessReport::default();
    for message in replies {
        let node_id = message.src_node_id();
        if let Some(error) = message.error() {
            warn!("node {} raised error {}", node_id, error);
            report.failed.push((node_id, error.to_string()));
            continue;
        }
        let content = match message.content() {
            Some(content) => content,
            None => continue,
        };
        let success = reply::read_success(content)
            .map_err(|source| FlowError::MalformedReply { node_id, source })?;
        let text = reply::read_message(content).unwrap_or_default();
        if success {
            info!("node {} {}", node_id, text);
            report.succeeded.push(node_id);
        } else {
            warn!("node {} failed: {}", node_id, text);
            report.failed.push((node_id, text.to_string()));
        }
    }
    Ok(report)
}

/// Sends the operations of a round to the nodes.
#[derive(Clone)]
pub struct RoundFlow {
    driver: Arc<dyn Driver>,
    driver_settings: DriverSettings,
    round_settings: RoundSettings,
}

impl RoundFlow {
    pub fn new(
        driver: Arc<dyn Driver>,
        driver_settings: DriverSettings,
        round_settings: RoundSettings,
    ) -> Self {
        Self {
            driver,
            driver_settings,
            round_settings,
        }
    }

    /// Gets the ids of the currently connected nodes.
    pub async fn node_ids(&self) -> Result<Vec<NodeId>, FlowError> {
        Ok(self.driver.node_ids().await?)
    }

    /// Sends `instruction` to every node of `node_ids` and waits for all replies.
    ///
    /// If `check` is set, the replies are validated with [`check_success()`]. Unless failures
    /// abort the round, only the successful replies are returned.
    pub async fn execution_flow(
        &self,
        node_ids: &[NodeId],
        instruction: Instruction,
        check: bool,
    ) -> Result<Vec<Message>, FlowError> {
        let stage = instruction.stage();
        let span = info_span!("barrier", group = stage.group_id(), nodes = node_ids.len());

        async move {
            debug!("sending {:?}", instruction);
            let messages = driver::create_messages(
                instruction.into_record_set(),
                stage.message_type(),
                node_ids,
                stage.group_id(),
                self.driver_settings.ttl(),
            );
            let message_ids = driver::send(self.driver.as_ref(), messages).await?;
            let replies = driver::wait_with_timeout(
                self.driver.as_ref(),
                &message_ids,
                self.driver_settings.poll_interval(),
                self.driver_settings.barrier_timeout(),
            )
            .await?;
            debug!("received {} replies", replies.len());

            if !check {
                return Ok(replies);
            }
            let report = check_success(&replies)?;
            if report.is_success() {
                return Ok(replies);
            }
            if self.round_settings.abort_on_failure {
                return Err(FlowError::StageFailed {
                    stage,
                    failed: report.failed.len(),
                    total: node_ids.len(),
                });
            }
            warn!(
                "going on with {} of {} nodes",
                report.succeeded.len(),
                node_ids.len()
            );
            Ok(replies
                .into_iter()
                .filter(|message| report.succeeded.contains(&message.src_node_id()))
                .collect())
        }
        .instrument(span)
        .await
    }

    /// Asks the nodes whether they serve `use_case`.
    ///
    /// Returns the participating nodes in reply arrival order. A node which replied with an
    /// error doesn't participate.
    pub async fn filter_clients(
        &self,
        node_ids: &[NodeId],
        use_case: &str,
    ) -> Result<Vec<NodeId>, FlowError> {
        let instruction = Instruction::FilterClients {
            use_case: use_case.to_string(),
        };
        let replies = self.execution_flow(node_ids, instruction, false).await?;

        let mut participants = Vec::with_capacity(replies.len());
        for message in replies {
            let node_id = message.src_node_id();
            let content = match (message.content(), message.error()) {
                (Some(content), _) => content,
                (None, Some(error)) => {
                    warn!("node {} raised error {}, excluding it", node_id, error);
                    continue;
                }
                (None, None) => continue,
            };
            let participate = reply::read_participate(content)
                .map_err(|source| FlowError::MalformedReply { node_id, source })?;
            if participate {
                participants.push(node_id);
            } else {
                debug!("node {} doesn't serve {}", node_id, use_case);
            }
        }
        Ok(participants)
    }

    pub async fn set_run_config(
        &self,
        node_ids: &[NodeId],
        experiment_id: &str,
        run_id: &str,
        model_name: &str,
        model_version: i64,
    ) -> Result<(), FlowError> {
        let instruction = Instruction::SetRunConfig {
            experiment_id: experiment_id.to_string(),
            run_id: run_id.to_string(),
            model_name: model_name.to_string(),
            model_version,
        };
        self.execution_flow(node_ids, instruction, true).await?;
        Ok(())
    }

    pub async fn load_data(&self, node_ids: &[NodeId], use_case: &str) -> Result<(), FlowError> {
        let instruction = Instruction::LoadData {
            use_case: use_case.to_string(),
        };
        self.execution_flow(node_ids, instruction, true).await?;
        Ok(())
    }

    pub async fn load_model(
        &self,
        node_ids: &[NodeId],
        model_name: &str,
        model_version: i64,
    ) -> Result<(), FlowError> {
        let instruction = Instruction::LoadModel {
            model_name: model_name.to_string(),
            model_version,
        };
        self.execution_flow(node_ids, instruction, true).await?;
        Ok(())
    }

    pub async fn prepare_data(&self, node_ids: &[NodeId]) -> Result<(), FlowError> {
        self.execution_flow(node_ids, Instruction::PrepareData, true)
            .await?;
        Ok(())
    }

    /// Gets the parameters of one node, picked at random.
    pub async fn get_parameters_from_one_node(
        &self,
        node_ids: &[NodeId],
    ) -> Result<ParametersRecord, FlowError> {
        let stage = Stage::GetParameters;
        let node_id = pick_one(node_ids).ok_or(FlowError::NoNodes(stage))?;
        info!("getting the parameters of node {}", node_id);

        let replies = self
            .execution_flow(&[node_id], Instruction::GetParameters, true)
            .await?;
        let message = replies.first().ok_or(FlowError::NoSuccess(stage))?;
        let content = message.content().ok_or(FlowError::NoSuccess(stage))?;
        content
            .parameters()
            .map(Clone::clone)
            .map_err(|source| FlowError::MalformedReply { node_id, source })
    }

    pub async fn set_parameters(
        &self,
        node_ids: &[NodeId],
        parameters: ParametersRecord,
    ) -> Result<(), FlowError> {
        self.execution_flow(node_ids, Instruction::SetParameters { parameters }, true)
            .await?;
        Ok(())
    }

    /// Trains one local pass on every node and collects the results.
    pub async fn train_model(
        &self,
        node_ids: &[NodeId],
        parameters: ParametersRecord,
        current_global_iter: u32,
    ) -> Result<Vec<(ParametersRecord, MetricsRecord)>, FlowError> {
        let instruction = Instruction::Train {
            parameters,
            current_global_iter,
        };
        let replies = self.execution_flow(node_ids, instruction, true).await?;
        replies
            .iter()
            .filter_map(|message| message.content().map(|c| (message.src_node_id(), c)))
            .map(|(node_id, content)| {
                reply::read_train(content)
                    .map_err(|source| FlowError::MalformedReply { node_id, source })
            })
            .collect()
    }

    /// Uploads the final parameters through one node, picked at random.
    pub async fn upload_model(
        &self,
        node_ids: &[NodeId],
        parameters: ParametersRecord,
    ) -> Result<UploadReceipt, FlowError> {
        let stage = Stage::UploadModel;
        let node_id = pick_one(node_ids).ok_or(FlowError::NoNodes(stage))?;
        info!("uploading the model through node {}", node_id);

        let replies = self
            .execution_flow(&[node_id], Instruction::UploadModel { parameters }, true)
            .await?;
        let message = replies.first().ok_or(FlowError::NoSuccess(stage))?;
        let content = message.content().ok_or(FlowError::NoSuccess(stage))?;
        reply::read_upload(content).map_err(|source| FlowError::MalformedReply { node_id, source })
    }

    pub async fn clean_config(&self, node_ids: &[NodeId]) -> Result<(), FlowError> {
        self.execution_flow(node_ids, Instruction::CleanConfig, true)
            .await?;
        Ok(())
    }
}

fn pick_one(node_ids: &[NodeId]) -> Option<NodeId> {
    node_ids.choose(&mut rand::thread_rng()).copied()
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;

    use super::*;
    use crate::{
        driver::MockDriver,
        testutils::{enable_logging, error_reply, reply_to, request_id, FakeNodes},
    };
    use fedorch_core::{
        message::{ErrorCode, MessageType, RemoteError},
        records::{ConfigsRecord, RecordSet},
        testutils::records::{metrics, parameters},
    };

    fn flow(driver: impl Driver + 'static, abort_on_failure: bool) -> RoundFlow {
        RoundFlow::new(
            Arc::new(driver),
            DriverSettings::default(),
            RoundSettings {
                abort_on_failure,
                min_nodes: 1,
            },
        )
    }

    fn replies(contents: Vec<(NodeId, RecordSet)>) -> Vec<Message> {
        contents
            .into_iter()
            .map(|(node_id, content)| reply_to(node_id, Stage::PrepareData, content))
            .collect()
    }

    #[test]
    fn test_check_success() {
        enable_logging();
        let mut messages = replies(vec![
            (1, reply::success("data prepared")),
            (2, reply::failure("no data")),
        ]);
        messages.push(error_reply(
            3,
            Stage::PrepareData,
            RemoteError::new(ErrorCode::Internal, "boom"),
        ));

        let report = check_success(&messages).unwrap();
        assert_eq!(report.succeeded, vec![1]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0], (2, "no data".to_string()));
        assert!(!report.is_success());
    }

    #[test]
    fn test_check_success_rejects_malformed_replies() {
        let missing = replies(vec![(1, reply::participate(true))]);
        assert!(matches!(
            check_success(&missing),
            Err(FlowError::MalformedReply { node_id: 1, .. })
        ));

        let mistyped = replies(vec![(
            2,
            RecordSet::new().with_config(ConfigsRecord::new().with("success", "yes")),
        )]);
        assert!(matches!(
            check_success(&mistyped),
            Err(FlowError::MalformedReply {
                node_id: 2,
                source: FieldError::TypeMismatch { .. },
            })
        ));
    }

    #[tokio::test]
    async fn test_filter_clients_keeps_arrival_order() {
        enable_logging();
        tokio::time::pause();
        let mut driver = MockDriver::new();
        let mut seq = Sequence::new();
        driver
            .expect_push_messages()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|messages| {
                let dst: Vec<NodeId> = messages
                    .iter()
                    .map(|m| m.metadata().dst_node_id)
                    .collect();
                assert_eq!(dst, vec![1, 2, 3]);
                assert_eq!(messages[0].metadata().group_id, "filter_message");
                Ok(messages
                    .iter()
                    .map(|m| Some(request_id(m.metadata().dst_node_id)))
                    .collect())
            });
        // node 3 answers before node 1
        driver
            .expect_pull_messages()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(vec![
                    reply_to(3, Stage::FilterClients, reply::participate(true)),
                    reply_to(2, Stage::FilterClients, reply::participate(false)),
                ])
            });
        driver
            .expect_pull_messages()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![reply_to(1, Stage::FilterClients, reply::participate(true))]));

        let participants = flow(driver, true)
            .filter_clients(&[1, 2, 3], "iris")
            .await
            .unwrap();
        assert_eq!(participants, vec![3, 1]);
    }

    #[tokio::test]
    async fn test_filter_clients_excludes_nodes_with_errors() {
        let nodes = FakeNodes::new(&[1, 2, 3], |node_id, request| match node_id {
            2 => Err(RemoteError::new(ErrorCode::Unsupported, "unknown mode")),
            _ => {
                let use_case = match Instruction::decode(
                    request.metadata().message_type,
                    request.content().unwrap(),
                ) {
                    Ok(Instruction::FilterClients { use_case }) => use_case,
                    _ => unreachable!(),
                };
                Ok(reply::participate(use_case == "iris"))
            }
        });
        let participants = flow(nodes, true)
            .filter_clients(&[1, 2, 3], "iris")
            .await
            .unwrap();
        assert_eq!(participants, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_checked_stage_aborts_on_failure() {
        let failing = |node_id: NodeId, _: &Message| -> Result<RecordSet, RemoteError> {
            match node_id {
                2 => Ok(reply::failure("no data")),
                _ => Ok(reply::success("data prepared")),
            }
        };

        let err = flow(FakeNodes::new(&[1, 2, 3], failing), true)
            .prepare_data(&[1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::StageFailed {
                stage: Stage::PrepareData,
                failed: 1,
                total: 3,
            }
        ));

        let replies = flow(FakeNodes::new(&[1, 2, 3], failing), false)
            .execution_flow(&[1, 2, 3], Instruction::PrepareData, true)
            .await
            .unwrap();
        let mut nodes: Vec<NodeId> = replies.iter().map(Message::src_node_id).collect();
        nodes.sort_unstable();
        assert_eq!(nodes, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_unchecked_stage_returns_every_reply() {
        let nodes = FakeNodes::new(&[1, 2], |node_id, _| match node_id {
            1 => Err(RemoteError::new(ErrorCode::Internal, "boom")),
            _ => Ok(reply::failure("nope")),
        });
        let replies = flow(nodes, true)
            .execution_flow(&[1, 2], Instruction::PrepareData, false)
            .await
            .unwrap();
        assert_eq!(replies.len(), 2);
    }

    #[tokio::test]
    async fn test_train_model() {
        let nodes = FakeNodes::new(&[1, 2], |node_id, request| {
            assert_eq!(request.metadata().message_type, MessageType::Train);
            assert_eq!(request.metadata().group_id, "train_model");
            Ok(reply::train(
                parameters(node_id as f32),
                metrics(0.1 * node_id as f64),
            ))
        });
        let results = flow(nodes, true)
            .train_model(&[1, 2], parameters(0.0), 0)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.contains(&(parameters(1.0), metrics(0.1))));
        assert!(results.contains(&(parameters(2.0), metrics(0.2))));
    }

    #[tokio::test]
    async fn test_get_parameters_from_one_node() {
        let nodes = FakeNodes::new(&[1, 2, 3], |node_id, _| {
            Ok(reply::parameters(parameters(node_id as f32)))
        });
        let handle = nodes.clone();
        let params = flow(nodes, true)
            .get_parameters_from_one_node(&[1, 2, 3])
            .await
            .unwrap();

        let requests = handle.requests();
        assert_eq!(requests.len(), 1);
        let node_id = requests[0].metadata().dst_node_id;
        assert_eq!(params, parameters(node_id as f32));

        let empty = flow(MockDriver::new(), true)
            .get_parameters_from_one_node(&[])
            .await;
        assert!(matches!(
            empty,
            Err(FlowError::NoNodes(Stage::GetParameters))
        ));
    }

    #[tokio::test]
    async fn test_upload_model() {
        let nodes = FakeNodes::new(&[1, 2, 3], |_, _| Ok(reply::upload("trained_iris/1", "run-1")));
        let handle = nodes.clone();
        let receipt = flow(nodes, true)
            .upload_model(&[1, 2, 3], parameters(1.0))
            .await
            .unwrap();
        assert_eq!(receipt.model_id, "trained_iris/1");
        assert_eq!(handle.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_barrier_timeout() {
        tokio::time::pause();
        let mut driver = MockDriver::new();
        driver
            .expect_push_messages()
            .returning(|messages| Ok(messages.iter().map(|_| Some(request_id(1))).collect()));
        driver.expect_pull_messages().returning(|_| Ok(vec![]));

        let flow = RoundFlow::new(
            Arc::new(driver),
            DriverSettings {
                barrier_timeout_secs: Some(30),
                ..DriverSettings::default()
            },
            RoundSettings::default(),
        );
        let err = flow.prepare_data(&[1]).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::Driver(DriverError::Timeout { expected: 1, .. })
        ));
    }
}
