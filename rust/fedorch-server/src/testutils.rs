//! Helpers for the tests of the coordinator.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fedorch_core::{
    instruction::{Instruction, Stage},
    message::{Message, MessageId, Metadata, RemoteError, DEFAULT_TTL, SERVER_NODE_ID},
    records::RecordSet,
    reply,
    task::{Task, TaskStatus},
    testutils::records::{metrics, parameters},
    NodeId,
};

use crate::driver::{Driver, DriverError};

pub fn enable_logging() {
    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .with_test_writer()
        .try_init();
}

/// A task with id 42 for the `iris` use case and version 1 of the `iris` model.
pub fn task(num_global_iterations: u32) -> Task {
    Task {
        id: Some(42),
        user_id: "user".to_string(),
        use_case: "iris".to_string(),
        model_name: "iris".to_string(),
        model_version: 1,
        num_global_iterations,
        run_name: "run".to_string(),
        experiment_name: "experiment".to_string(),
        status: TaskStatus::Pending,
        created_at: chrono::NaiveDate::from_ymd(2021, 1, 1).and_hms(0, 0, 0),
    }
}

/// Answers like a node which serves `iris` and succeeds at everything.
///
/// Training returns parameters filled with `node_id + iteration` and a loss of `node_id`.
pub fn healthy_node(node_id: NodeId, request: &Message) -> Result<RecordSet, RemoteError> {
    let content = request.content().unwrap();
    let instruction = Instruction::decode(request.metadata().message_type, content).unwrap();
    Ok(match instruction {
        Instruction::FilterClients { use_case } => reply::participate(use_case == "iris"),
        Instruction::GetParameters => reply::parameters(parameters(0.0)),
        Instruction::Train {
            current_global_iter,
            ..
        } => reply::train(
            parameters(node_id as f32 + current_global_iter as f32),
            metrics(node_id as f64),
        ),
        Instruction::UploadModel { .. } => reply::upload("trained_iris/1", "run-1"),
        other => reply::success(&format!("{} done", other.stage())),
    })
}

/// The id the tests assign to the request sent to `node_id`.
pub fn request_id(node_id: NodeId) -> MessageId {
    MessageId::from(node_id)
}

/// A pushed request of the coordinator to `node_id`.
pub fn request(node_id: NodeId, stage: Stage) -> Message {
    let metadata = Metadata {
        message_id: Some(request_id(node_id)),
        src_node_id: SERVER_NODE_ID,
        dst_node_id: node_id,
        reply_to_message: None,
        group_id: stage.group_id().to_string(),
        ttl: DEFAULT_TTL,
        message_type: stage.message_type(),
    };
    Message::new(metadata, RecordSet::new())
}

/// The reply of `node_id` to its request of `stage`.
pub fn reply_to(node_id: NodeId, stage: Stage, content: RecordSet) -> Message {
    request(node_id, stage).create_reply(content)
}

/// The error reply of `node_id` to its request of `stage`.
pub fn error_reply(node_id: NodeId, stage: Stage, error: RemoteError) -> Message {
    request(node_id, stage).create_error_reply(error)
}

type Handler = dyn Fn(NodeId, &Message) -> Result<RecordSet, RemoteError> + Send + Sync;

#[derive(Default)]
struct Exchange {
    requests: Vec<Message>,
    replies: Vec<Message>,
}

/// A driver whose nodes answer every request immediately.
///
/// The answers are computed by a handler from the id of the node and the request, an `Err`
/// becomes an error reply. Requests to nodes which are not connected can't be pushed.
#[derive(Clone)]
pub struct FakeNodes {
    node_ids: Vec<NodeId>,
    handler: Arc<Handler>,
    exchange: Arc<Mutex<Exchange>>,
}

impl FakeNodes {
    pub fn new<F>(node_ids: &[NodeId], handler: F) -> Self
    where
        F: Fn(NodeId, &Message) -> Result<RecordSet, RemoteError> + Send + Sync + 'static,
    {
        Self {
            node_ids: node_ids.to_vec(),
            handler: Arc::new(handler),
            exchange: Arc::new(Mutex::new(Exchange::default())),
        }
    }

    /// Gets every pushed request in push order.
    pub fn requests(&self) -> Vec<Message> {
        self.exchange.lock().unwrap().requests.clone()
    }

    /// Gets the pushed requests of a stage.
    pub fn requests_of(&self, stage: Stage) -> Vec<Message> {
        self.requests()
            .into_iter()
            .filter(|request| request.metadata().group_id == stage.group_id())
            .collect()
    }
}

#[async_trait]
impl Driver for FakeNodes {
    async fn node_ids(&self) -> Result<Vec<NodeId>, DriverError> {
        Ok(self.node_ids.clone())
    }

    async fn push_messages(
        &self,
        messages: Vec<Message>,
    ) -> Result<Vec<Option<MessageId>>, DriverError> {
        let mut exchange = self.exchange.lock().unwrap();
        let mut message_ids = Vec::with_capacity(messages.len());
        for mut message in messages {
            let node_id = message.metadata().dst_node_id;
            if !self.node_ids.contains(&node_id) {
                message_ids.push(None);
                continue;
            }
            let message_id = MessageId::generate();
            message.metadata_mut().message_id = Some(message_id);
            let reply = match (self.handler)(node_id, &message) {
                Ok(content) => message.create_reply(content),
                Err(error) => message.create_error_reply(error),
            };
            exchange.requests.push(message);
            exchange.replies.push(reply);
            message_ids.push(Some(message_id));
        }
        Ok(message_ids)
    }

    async fn pull_messages(&self, message_ids: &[MessageId]) -> Result<Vec<Message>, DriverError> {
        let wanted: HashSet<&MessageId> = message_ids.iter().collect();
        let mut exchange = self.exchange.lock().unwrap();
        let (pulled, kept): (Vec<Message>, Vec<Message>) =
            exchange.replies.drain(..).partition(|reply| {
                reply
                    .metadata()
                    .reply_to_message
                    .map_or(false, |id| wanted.contains(&id))
            });
        exchange.replies = kept;
        Ok(pulled)
    }
}
