//! The message envelope.
//!
//! A [`Message`] wraps the [`RecordSet`] of a request or a reply together with its routing
//! [`Metadata`]. Requests are created by the coordinator, one per destination node, and replies
//! are created from the request they answer with [`Message::create_reply()`] or
//! [`Message::create_error_reply()`]. A reply carries either content or a [`RemoteError`], never
//! both.
//!
//! Messages are encoded with `bincode` whenever they cross a transport.

use std::time::Duration;

use derive_more::{Display, From, Into};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{records::RecordSet, NodeId};

/// The node id used by the coordinator itself.
pub const SERVER_NODE_ID: NodeId = 0;

/// The default time-to-live of a message.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// The correlation id of a message, assigned by the transport when the message is pushed.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From, Into, Serialize, Deserialize,
)]
#[display(fmt = "{:016x}", _0)]
pub struct MessageId(u64);

impl MessageId {
    /// Generates a random message id.
    pub fn generate() -> Self {
        Self(rand::thread_rng().gen())
    }
}

/// The kind of a message.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// A control operation.
    #[display(fmt = "query")]
    Query,
    /// A training operation.
    #[display(fmt = "train")]
    Train,
    /// An evaluation of the local model. No stage of a round sends it.
    #[display(fmt = "evaluate")]
    Evaluate,
}

/// The routing information of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// The id assigned by the transport, `None` until the message has been pushed.
    pub message_id: Option<MessageId>,
    pub src_node_id: NodeId,
    pub dst_node_id: NodeId,
    /// The id of the request this message replies to.
    pub reply_to_message: Option<MessageId>,
    /// A tag naming the operation, used to correlate logs.
    pub group_id: String,
    pub ttl: Duration,
    pub message_type: MessageType,
}

/// The class of a transport-level error.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A field of the request is missing or has the wrong type.
    #[display(fmt = "validation")]
    Validation,
    /// The node does not support the requested operation or use case.
    #[display(fmt = "unsupported")]
    Unsupported,
    /// The node failed to perform the operation.
    #[display(fmt = "internal")]
    Internal,
}

/// An error reported by a node instead of reply content.
#[derive(Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[display(fmt = "{}: {}", code, reason)]
pub struct RemoteError {
    pub code: ErrorCode,
    pub reason: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Body {
    Content(RecordSet),
    Error(RemoteError),
}

/// Errors related to the encoding and decoding of messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("failed to encode or decode message: {0}")]
    Bincode(#[from] bincode::Error),
}

/// A message with its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    metadata: Metadata,
    body: Body,
}

impl Message {
    /// Creates a message carrying `content`.
    pub fn new(metadata: Metadata, content: RecordSet) -> Self {
        Self {
            metadata,
            body: Body::Content(content),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Gets the id of the node which sent the message.
    pub fn src_node_id(&self) -> NodeId {
        self.metadata.src_node_id
    }

    pub fn has_error(&self) -> bool {
        matches!(self.body, Body::Error(_))
    }

    pub fn has_content(&self) -> bool {
        matches!(self.body, Body::Content(_))
    }

    pub fn content(&self) -> Option<&RecordSet> {
        match &self.body {
            Body::Content(content) => Some(content),
            Body::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RemoteError> {
        match &self.body {
            Body::Content(_) => None,
            Body::Error(error) => Some(error),
        }
    }

    pub fn into_content(self) -> Option<RecordSet> {
        match self.body {
            Body::Content(content) => Some(content),
            Body::Error(_) => None,
        }
    }

    fn reply_metadata(&self) -> Metadata {
        Metadata {
            message_id: None,
            src_node_id: self.metadata.dst_node_id,
            dst_node_id: self.metadata.src_node_id,
            reply_to_message: self.metadata.message_id,
            group_id: self.metadata.group_id.clone(),
            ttl: self.metadata.ttl,
            message_type: self.metadata.message_type,
        }
    }

    /// Creates a reply carrying `content`, addressed to the sender of this message.
    pub fn create_reply(&self, content: RecordSet) -> Self {
        Self::new(self.reply_metadata(), content)
    }

    /// Creates a reply carrying `error`, addressed to the sender of this message.
    pub fn create_error_reply(&self, error: RemoteError) -> Self {
        Self {
            metadata: self.reply_metadata(),
            body: Body::Error(error),
        }
    }

    /// Encodes the message.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a message.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Array, ConfigsRecord, ParametersRecord};

    fn request() -> Message {
        let parameters: ParametersRecord = vec![(
            "linear.weight",
            Array::from_values(vec![1, 2], &[0.25_f32, -4.0]).unwrap(),
        )]
        .into_iter()
        .collect();
        let content = RecordSet::new()
            .with_config(ConfigsRecord::new().with("mode", "set_parameters"))
            .with_parameters(parameters);
        Message::new(
            Metadata {
                message_id: Some(MessageId::from(7)),
                src_node_id: SERVER_NODE_ID,
                dst_node_id: 42,
                reply_to_message: None,
                group_id: "set_parameters".to_string(),
                ttl: DEFAULT_TTL,
                message_type: MessageType::Query,
            },
            content,
        )
    }

    #[test]
    fn test_create_reply() {
        let request = request();
        let reply = request.create_reply(RecordSet::new());
        let metadata = reply.metadata();

        assert_eq!(metadata.message_id, None);
        assert_eq!(metadata.src_node_id, 42);
        assert_eq!(metadata.dst_node_id, SERVER_NODE_ID);
        assert_eq!(metadata.reply_to_message, Some(MessageId::from(7)));
        assert_eq!(metadata.group_id, "set_parameters");
        assert!(reply.has_content());
        assert!(!reply.has_error());
    }

    #[test]
    fn test_create_error_reply() {
        let reply = request().create_error_reply(RemoteError::new(
            ErrorCode::Unsupported,
            "unknown use case: mnist",
        ));
        assert!(reply.has_error());
        assert!(reply.content().is_none());
        assert_eq!(
            reply.error().unwrap().to_string(),
            "unsupported: unknown use case: mnist"
        );
    }

    #[test]
    fn test_encode_decode() {
        let request = request();
        let bytes = request.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), request);
        assert!(Message::decode(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_message_id_display() {
        assert_eq!(MessageId::from(255).to_string(), "00000000000000ff");
    }
}
