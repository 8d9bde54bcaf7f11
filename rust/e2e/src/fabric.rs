//! An in-memory messaging fabric.
//!
//! The [`Fabric`] connects the coordinator with nodes running in the same process. Every message
//! crossing it is encoded and decoded again, so the nodes and the coordinator only ever see what
//! survives the wire format. The coordinator side is the [`Driver`], a node is connected through
//! a [`FabricLink`].

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use fedorch_client::node::{LinkError, NodeLink};
use fedorch_core::{
    message::{Message, MessageId},
    NodeId,
};
use fedorch_server::driver::{Driver, DriverError};

/// A batch of requests pushed to the fabric in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedBatch {
    pub group_id: String,
    /// The destinations the requests were delivered to.
    pub node_ids: Vec<NodeId>,
}

#[derive(Default)]
struct FabricState {
    inboxes: HashMap<NodeId, mpsc::UnboundedSender<Vec<u8>>>,
    replies: Vec<Message>,
    batches: Vec<PushedBatch>,
}

/// The shared in-memory fabric.
#[derive(Clone, Default)]
pub struct Fabric {
    state: Arc<Mutex<FabricState>>,
}

impl Fabric {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FabricState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects the node `node_id`, replacing an earlier connection of the same node.
    pub fn connect(&self, node_id: NodeId) -> FabricLink {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().inboxes.insert(node_id, tx);
        debug!("node {} connected", node_id);
        FabricLink {
            node_id,
            inbox: rx,
            fabric: self.clone(),
        }
    }

    /// Disconnects a node. Requests already delivered to it are still handed out.
    pub fn disconnect(&self, node_id: NodeId) {
        if self.state().inboxes.remove(&node_id).is_some() {
            debug!("node {} disconnected", node_id);
        }
    }

    /// Disconnects every node, which makes the nodes stop once their inbox is drained.
    pub fn disconnect_all(&self) {
        self.state().inboxes.clear();
    }

    /// Gets the batches of requests pushed so far, in push order.
    pub fn batches(&self) -> Vec<PushedBatch> {
        self.state().batches.clone()
    }

    fn deliver_reply(&self, reply: Message) {
        self.state().replies.push(reply);
    }
}

#[async_trait]
impl Driver for Fabric {
    async fn node_ids(&self) -> Result<Vec<NodeId>, DriverError> {
        let mut node_ids: Vec<NodeId> = self.state().inboxes.keys().copied().collect();
        node_ids.sort_unstable();
        Ok(node_ids)
    }

    async fn push_messages(
        &self,
        messages: Vec<Message>,
    ) -> Result<Vec<Option<MessageId>>, DriverError> {
        let mut state = self.state();
        let mut message_ids = Vec::with_capacity(messages.len());
        let mut batch = PushedBatch {
            group_id: messages
                .first()
                .map(|message| message.metadata().group_id.clone())
                .unwrap_or_default(),
            node_ids: Vec::new(),
        };

        for mut message in messages {
            let dst_node_id = message.metadata().dst_node_id;
            let inbox = match state.inboxes.get(&dst_node_id) {
                Some(inbox) => inbox,
                None => {
                    message_ids.push(None);
                    continue;
                }
            };
            let message_id = MessageId::generate();
            message.metadata_mut().message_id = Some(message_id);
            let bytes = message
                .encode()
                .context("failed to encode the request")?;
            if inbox.send(bytes).is_ok() {
                batch.node_ids.push(dst_node_id);
                message_ids.push(Some(message_id));
            } else {
                message_ids.push(None);
            }
        }

        state.batches.push(batch);
        Ok(message_ids)
    }

    async fn pull_messages(&self, message_ids: &[MessageId]) -> Result<Vec<Message>, DriverError> {
        let wanted: HashSet<MessageId> = message_ids.iter().copied().collect();
        let mut state = self.state();
        let (pulled, kept): (Vec<Message>, Vec<Message>) = state.replies.drain(..).partition(|reply| {
            reply
                .metadata()
                .reply_to_message
                .map_or(false, |id| wanted.contains(&id))
        });
        state.replies = kept;
        Ok(pulled)
    }
}

/// The connection of one node to a [`Fabric`].
pub struct FabricLink {
    node_id: NodeId,
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    fabric: Fabric,
}

#[async_trait]
impl NodeLink for FabricLink {
    async fn receive(&mut self) -> Option<Message> {
        loop {
            let bytes = self.inbox.recv().await?;
            match Message::decode(&bytes) {
                Ok(request) => return Some(request),
                Err(err) => warn!("node {} dropped an undecodable request: {}", self.node_id, err),
            }
        }
    }

    async fn reply(&mut self, reply: Message) -> Result<(), LinkError> {
        let bytes = reply.encode().context("failed to encode the reply")?;
        let reply = Message::decode(&bytes).context("failed to decode the reply")?;
        self.fabric.deliver_reply(reply);
        Ok(())
    }
}
