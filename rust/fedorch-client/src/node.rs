//! The runtime of a node.
//!
//! A [`Node`] takes the requests addressed to it from a [`NodeLink`] one at a time and answers
//! each of them before taking the next one. A stage which fails doesn't stop the node, the
//! failure is reported to the coordinator as an error reply.

use async_trait::async_trait;
use displaydoc::Display;
use thiserror::Error;
use tracing::{info, info_span, warn};
use tracing_futures::Instrument;

#[cfg(test)]
use mockall::automock;

use fedorch_core::{message::Message, NodeId};

use crate::handlers::StageHandler;

/// Errors of a [`NodeLink`].
#[derive(Debug, Display, Error)]
pub enum LinkError {
    /// the link to the coordinator is closed
    Closed,
    /// failed to deliver the reply: {0}
    Transport(#[from] anyhow::Error),
}

/// The connection of a node to the messaging fabric.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeLink: Send {
    /// Waits for the next request addressed to the node. Returns `None` once the node is
    /// disconnected.
    async fn receive(&mut self) -> Option<Message>;

    /// Sends a reply back to the coordinator.
    async fn reply(&mut self, reply: Message) -> Result<(), LinkError>;
}

/// A node taking part in rounds.
pub struct Node {
    node_id: NodeId,
    handler: StageHandler,
}

impl Node {
    pub fn new(node_id: NodeId, handler: StageHandler) -> Self {
        Self { node_id, handler }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Handles one request and creates the reply to it.
    pub async fn handle(&mut self, request: &Message) -> Message {
        let span = info_span!(
            "node",
            node_id = self.node_id,
            stage = %request.metadata().group_id
        );
        let handler = &mut self.handler;

        async move {
            match handler.handle(request).await {
                Ok(content) => request.create_reply(content),
                Err(err) => {
                    warn!("failed to perform the stage: {}", err);
                    request.create_error_reply(err.to_remote())
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Answers requests until the node is disconnected.
    ///
    /// # Errors
    /// Fails if a reply can't be delivered.
    pub async fn run<L>(mut self, mut link: L) -> Result<(), LinkError>
    where
        L: NodeLink,
    {
        while let Some(request) = link.receive().await {
            let reply = self.handle(&request).await;
            link.reply(reply).await?;
        }
        info!("node {} disconnected", self.node_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mockall::{predicate::always, Sequence};

    use fedorch_core::{
        instruction::Instruction,
        message::{ErrorCode, MessageId},
        reply,
        testutils::{
            registry::{MemoryRegistry, ShiftModel},
            tracking::MemoryTracker,
        },
    };

    use super::*;
    use crate::{
        session::ClientSession,
        settings::NodeSettings,
        testutils::{enable_logging, request},
    };

    fn node() -> Node {
        enable_logging();
        let registry = MemoryRegistry::new().with_model("iris", 1, ShiftModel { step: 1.0 });
        let handler = StageHandler::new(
            ClientSession::new(NodeSettings::new("node-1", "../e2e/data/iris.csv")),
            Arc::new(MemoryTracker::new()),
            Arc::new(registry),
        );
        Node::new(1, handler)
    }

    #[tokio::test]
    async fn test_failed_stage_becomes_an_error_reply() {
        let mut node = node();
        let request = request(Instruction::LoadData {
            use_case: "mnist".to_string(),
        });
        let reply = node.handle(&request).await;

        assert_eq!(reply.metadata().reply_to_message, Some(MessageId::from(7)));
        assert_eq!(reply.metadata().group_id, "load_data");
        let error = reply.error().unwrap();
        assert_eq!(error.code, ErrorCode::Unsupported);
        assert_eq!(error.reason, "unknown use case: mnist");
    }

    #[tokio::test]
    async fn test_node_answers_until_disconnected() {
        let mut link = MockNodeLink::new();
        let mut seq = Sequence::new();
        let filter = request(Instruction::FilterClients {
            use_case: "iris".to_string(),
        });
        let prepare = request(Instruction::PrepareData);

        link.expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move || Some(filter.clone()));
        link.expect_reply()
            .withf(|reply| {
                reply
                    .content()
                    .map_or(false, |content| reply::read_participate(content) == Ok(true))
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        link.expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move || Some(prepare.clone()));
        link.expect_reply()
            .withf(|reply| reply.error().map_or(false, |error| error.code == ErrorCode::Internal))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        link.expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| None);

        assert!(node().run(link).await.is_ok());
    }

    #[tokio::test]
    async fn test_undeliverable_reply_stops_the_node() {
        let mut link = MockNodeLink::new();
        let filter = request(Instruction::FilterClients {
            use_case: "iris".to_string(),
        });
        link.expect_receive()
            .times(1)
            .returning(move || Some(filter.clone()));
        link.expect_reply()
            .with(always())
            .times(1)
            .returning(|_| Err(LinkError::Closed));

        assert!(matches!(node().run(link).await, Err(LinkError::Closed)));
    }
}
