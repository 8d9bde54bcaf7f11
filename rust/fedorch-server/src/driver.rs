//! The transport driver.
//!
//! The [`Driver`] is the coordinator side of the messaging fabric. It knows which nodes are
//! connected, accepts requests and hands out the replies of the nodes. On top of it this module
//! provides the three steps of a barrier: [`create_messages()`] replicates a request content for
//! every destination, [`send()`] pushes the requests and [`wait()`] polls until every pushed
//! request has been answered.

use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use fedorch_core::{
    message::{Message, MessageId, MessageType, Metadata, SERVER_NODE_ID},
    records::RecordSet,
    NodeId,
};

#[cfg(test)]
use mockall::automock;

/// Errors of the transport.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("transport failed: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("timed out after {elapsed:?} waiting for {expected} replies")]
    Timeout { elapsed: Duration, expected: usize },
}

/// The coordinator side of the messaging fabric.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Driver: Send + Sync {
    /// Gets the ids of the currently connected nodes.
    async fn node_ids(&self) -> Result<Vec<NodeId>, DriverError>;

    /// Pushes requests to their destinations.
    ///
    /// Returns one entry per message, in order: the id assigned to the message or `None` if its
    /// destination could not be reached, in which case no reply is to be expected.
    async fn push_messages(
        &self,
        messages: Vec<Message>,
    ) -> Result<Vec<Option<MessageId>>, DriverError>;

    /// Pulls the replies which arrived so far for the given requests.
    ///
    /// A reply is handed out once, replies are returned in arrival order.
    async fn pull_messages(&self, message_ids: &[MessageId]) -> Result<Vec<Message>, DriverError>;
}

/// Creates one request per destination node, all carrying the same content.
pub fn create_messages(
    content: RecordSet,
    message_type: MessageType,
    dst_node_ids: &[NodeId],
    group_id: &str,
    ttl: Duration,
) -> Vec<Message> {
    dst_node_ids
        .iter()
        .map(|dst_node_id| {
            let metadata = Metadata {
                message_id: None,
                src_node_id: SERVER_NODE_ID,
                dst_node_id: *dst_node_id,
                reply_to_message: None,
                group_id: group_id.to_string(),
                ttl,
                message_type,
            };
            Message::new(metadata, content.clone())
        })
        .collect()
}

/// Pushes requests and returns the ids to wait for.
pub async fn send(
    driver: &dyn Driver,
    messages: Vec<Message>,
) -> Result<Vec<Option<MessageId>>, DriverError> {
    let count = messages.len();
    let message_ids = driver.push_messages(messages).await?;
    let unreachable = message_ids.iter().filter(|id| id.is_none()).count();
    if unreachable > 0 {
        warn!("{} of {} nodes could not be reached", unreachable, count);
    }
    debug!("pushed {} messages", count - unreachable);
    Ok(message_ids)
}

/// Waits until a reply arrived for every pushed request.
///
/// Requests which could not be pushed are skipped. The driver is polled every `poll_interval`,
/// replies to unknown requests and duplicate replies are dropped. The replies are returned in
/// arrival order. Dropping the future stops the polling.
pub async fn wait(
    driver: &dyn Driver,
    message_ids: &[Option<MessageId>],
    poll_interval: Duration,
) -> Result<Vec<Message>, DriverError> {
    let mut pending: HashSet<MessageId> = message_ids.iter().flatten().copied().collect();
    let mut replies = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ids: Vec<MessageId> = pending.iter().copied().collect();
        for reply in driver.pull_messages(&ids).await? {
            match reply.metadata().reply_to_message {
                Some(id) if pending.remove(&id) => replies.push(reply),
                other => debug!("dropping unexpected reply to {:?}", other),
            }
        }
        debug!("got {} replies, {} pending", replies.len(), pending.len());
        if !pending.is_empty() {
            sleep(poll_interval).await;
        }
    }
    Ok(replies)
}

/// Waits like [`wait()`], but gives up after `limit` if a limit is given.
pub async fn wait_with_timeout(
    driver: &dyn Driver,
    message_ids: &[Option<MessageId>],
    poll_interval: Duration,
    limit: Option<Duration>,
) -> Result<Vec<Message>, DriverError> {
    let limit = match limit {
        Some(limit) => limit,
        None => return wait(driver, message_ids, poll_interval).await,
    };
    timeout(limit, wait(driver, message_ids, poll_interval))
        .await
        .map_err(|_| DriverError::Timeout {
            elapsed: limit,
            expected: message_ids.iter().flatten().count(),
        })?
}
