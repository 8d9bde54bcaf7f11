//! Helpers for the tests of the node.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fedorch_core::{
    instruction::Instruction,
    message::{Message, MessageId, MessageType, Metadata, DEFAULT_TTL, SERVER_NODE_ID},
    records::RecordSet,
};

pub fn enable_logging() {
    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .with_test_writer()
        .try_init();
}

fn metadata(message_type: MessageType, group_id: &str) -> Metadata {
    Metadata {
        message_id: Some(MessageId::from(7)),
        src_node_id: SERVER_NODE_ID,
        dst_node_id: 1,
        reply_to_message: None,
        group_id: group_id.to_string(),
        ttl: DEFAULT_TTL,
        message_type,
    }
}

/// A request of the coordinator to node `1` with arbitrary content.
pub fn raw_request(message_type: MessageType, content: RecordSet) -> Message {
    Message::new(metadata(message_type, "test"), content)
}

/// A request of the coordinator to node `1` carrying `instruction`.
pub fn request(instruction: Instruction) -> Message {
    let metadata = metadata(instruction.message_type(), instruction.stage().group_id());
    Message::new(metadata, instruction.into_record_set())
}
