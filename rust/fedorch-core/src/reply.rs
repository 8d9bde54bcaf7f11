//! Structured replies of the nodes.
//!
//! Every reply content carries a configuration record. Apart from the reply to
//! [`Stage::FilterClients`], which only holds the `participate` flag, it always contains a
//! boolean `success` field and a human readable `message`. Replies to training, parameter and
//! upload requests add their payloads.
//!
//! [`Stage::FilterClients`]: crate::instruction::Stage::FilterClients

use crate::records::{ConfigsRecord, FieldError, MetricsRecord, ParametersRecord, RecordSet};

pub const SUCCESS_FIELD: &str = "success";
pub const MESSAGE_FIELD: &str = "message";
pub const PARTICIPATE_FIELD: &str = "participate";

/// Creates the reply to a filter request.
pub fn participate(participate: bool) -> RecordSet {
    RecordSet::new().with_config(ConfigsRecord::new().with(PARTICIPATE_FIELD, participate))
}

fn status(success: bool, message: &str) -> ConfigsRecord {
    ConfigsRecord::new()
        .with(SUCCESS_FIELD, success)
        .with(MESSAGE_FIELD, message)
}

/// Creates a successful reply without payload.
pub fn success(message: &str) -> RecordSet {
    RecordSet::new().with_config(status(true, message))
}

/// Creates an unsuccessful reply without payload.
pub fn failure(message: &str) -> RecordSet {
    RecordSet::new().with_config(status(false, message))
}

/// Creates the reply to a get parameters request.
pub fn parameters(parameters: ParametersRecord) -> RecordSet {
    RecordSet::new()
        .with_config(status(true, "retrieved parameters"))
        .with_parameters(parameters)
}

/// Creates the reply to a training request.
pub fn train(parameters: ParametersRecord, metrics: MetricsRecord) -> RecordSet {
    RecordSet::new()
        .with_config(status(true, "model trained successfully"))
        .with_parameters(parameters)
        .with_metrics(metrics)
}

/// Creates the reply to an upload request.
pub fn upload(model_id: &str, run_id: &str) -> RecordSet {
    RecordSet::new().with_config(
        status(true, "model uploaded successfully")
            .with("model_id", model_id)
            .with("run_id", run_id),
    )
}

/// Reads the `participate` flag of a filter reply.
pub fn read_participate(content: &RecordSet) -> Result<bool, FieldError> {
    content.config()?.get_bool(PARTICIPATE_FIELD)
}

/// Reads the `success` flag of a reply.
pub fn read_success(content: &RecordSet) -> Result<bool, FieldError> {
    content.config()?.get_bool(SUCCESS_FIELD)
}

/// Reads the human readable message of a reply, if there is one.
pub fn read_message(content: &RecordSet) -> Option<&str> {
    content.config().ok()?.get_str(MESSAGE_FIELD).ok()
}

/// Reads the payload of a training reply.
pub fn read_train(content: &RecordSet) -> Result<(ParametersRecord, MetricsRecord), FieldError> {
    Ok((content.parameters()?.clone(), content.metrics()?.clone()))
}

/// The registry identifiers of an uploaded model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub model_id: String,
    pub run_id: String,
}

/// Reads the payload of an upload reply.
pub fn read_upload(content: &RecordSet) -> Result<UploadReceipt, FieldError> {
    let config = content.config()?;
    Ok(UploadReceipt {
        model_id: config.get_str("model_id")?.to_string(),
        run_id: config.get_str("run_id")?.to_string(),
    })
}
