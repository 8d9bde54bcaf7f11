//! The operations a node performs on behalf of the coordinator.
//!
//! Every request sent during a round carries exactly one [`Instruction`]. On the wire, control
//! operations are [`MessageType::Query`] messages whose configuration record holds a `mode`
//! string naming the [`Stage`], and training is a [`MessageType::Train`] message without a
//! mode. The operation specific fields are type checked when a request is decoded, a field of
//! the wrong type is an error and is never coerced.

use std::{fmt, str::FromStr};

use derive_more::Display;
use thiserror::Error;

use crate::{
    message::MessageType,
    records::{ConfigsRecord, FieldError, ParametersRecord, RecordSet},
};

/// The configuration field selecting the operation of a query.
pub const MODE_FIELD: &str = "mode";

/// The stage of a node a request moves it through.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    #[display(fmt = "filter_clients")]
    FilterClients,
    #[display(fmt = "load_data")]
    LoadData,
    #[display(fmt = "load_model")]
    LoadModel,
    #[display(fmt = "prepare_data")]
    PrepareData,
    #[display(fmt = "set_run_config")]
    SetRunConfig,
    #[display(fmt = "get_parameters")]
    GetParameters,
    #[display(fmt = "set_parameters")]
    SetParameters,
    #[display(fmt = "train")]
    Train,
    #[display(fmt = "upload_model")]
    UploadModel,
    #[display(fmt = "clean_config")]
    CleanConfig,
}

impl Stage {
    /// Gets the kind of message that carries requests of this stage.
    pub fn message_type(self) -> MessageType {
        match self {
            Stage::Train => MessageType::Train,
            _ => MessageType::Query,
        }
    }

    /// Gets the group tag under which requests of this stage are sent.
    pub fn group_id(self) -> &'static str {
        match self {
            Stage::FilterClients => "filter_message",
            Stage::Train => "train_model",
            Stage::LoadData => "load_data",
            Stage::LoadModel => "load_model",
            Stage::PrepareData => "prepare_data",
            Stage::SetRunConfig => "set_run_config",
            Stage::GetParameters => "get_parameters",
            Stage::SetParameters => "set_parameters",
            Stage::UploadModel => "upload_model",
            Stage::CleanConfig => "clean_config",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown mode: {0}")]
/// Error returned when a query names an operation that doesn't exist.
pub struct UnknownMode(pub String);

impl FromStr for Stage {
    type Err = UnknownMode;

    /// Parses the mode of a query. Training is not selected by a mode.
    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "filter_clients" => Ok(Stage::FilterClients),
            "load_data" => Ok(Stage::LoadData),
            "load_model" => Ok(Stage::LoadModel),
            "prepare_data" => Ok(Stage::PrepareData),
            "set_run_config" => Ok(Stage::SetRunConfig),
            "get_parameters" => Ok(Stage::GetParameters),
            "set_parameters" => Ok(Stage::SetParameters),
            "upload_model" => Ok(Stage::UploadModel),
            "clean_config" => Ok(Stage::CleanConfig),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Errors related to decoding an [`Instruction`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstructionError {
    #[error("invalid request field: {0}")]
    Field(#[from] FieldError),

    #[error(transparent)]
    UnknownMode(#[from] UnknownMode),

    #[error("{0} messages carry no instruction")]
    UnsupportedType(MessageType),
}

/// A request of the coordinator.
#[derive(Clone, PartialEq)]
pub enum Instruction {
    /// Asks whether the node serves the use case.
    FilterClients { use_case: String },
    /// Loads the dataset of the use case.
    LoadData { use_case: String },
    /// Fetches the model from the registry and instantiates a fresh learner.
    LoadModel {
        model_name: String,
        model_version: i64,
    },
    /// Hands the loaded dataset to the learner.
    PrepareData,
    /// Opens the node scoped tracking run under the parent run.
    SetRunConfig {
        experiment_id: String,
        run_id: String,
        model_name: String,
        model_version: i64,
    },
    GetParameters,
    SetParameters { parameters: ParametersRecord },
    /// Trains one local pass starting from the given parameters.
    Train {
        parameters: ParametersRecord,
        current_global_iter: u32,
    },
    /// Stores the final parameters in the registry.
    UploadModel { parameters: ParametersRecord },
    /// Finishes the node scoped tracking run.
    CleanConfig,
}

impl fmt::Debug for Instruction {
    // parameters are elided, they can be large
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::FilterClients { use_case } | Instruction::LoadData { use_case } => f
                .debug_struct(&self.stage().to_string())
                .field("use_case", use_case)
                .finish(),
            Instruction::LoadModel {
                model_name,
                model_version,
            } => f
                .debug_struct("load_model")
                .field("model_name", model_name)
                .field("model_version", model_version)
                .finish(),
            Instruction::SetRunConfig {
                experiment_id,
                run_id,
                model_name,
                model_version,
            } => f
                .debug_struct("set_run_config")
                .field("experiment_id", experiment_id)
                .field("run_id", run_id)
                .field("model_name", model_name)
                .field("model_version", model_version)
                .finish(),
            Instruction::Train {
                parameters,
                current_global_iter,
            } => f
                .debug_struct("train")
                .field("parameters", &parameters.len())
                .field("current_global_iter", current_global_iter)
                .finish(),
            Instruction::SetParameters { parameters } | Instruction::UploadModel { parameters } => f
                .debug_struct(&self.stage().to_string())
                .field("parameters", &parameters.len())
                .finish(),
            Instruction::PrepareData | Instruction::GetParameters | Instruction::CleanConfig => {
                write!(f, "{}", self.stage())
            }
        }
    }
}

impl Instruction {
    /// Gets the stage of the instruction.
    pub fn stage(&self) -> Stage {
        match self {
            Instruction::FilterClients { .. } => Stage::FilterClients,
            Instruction::LoadData { .. } => Stage::LoadData,
            Instruction::LoadModel { .. } => Stage::LoadModel,
            Instruction::PrepareData => Stage::PrepareData,
            Instruction::SetRunConfig { .. } => Stage::SetRunConfig,
            Instruction::GetParameters => Stage::GetParameters,
            Instruction::SetParameters { .. } => Stage::SetParameters,
            Instruction::Train { .. } => Stage::Train,
            Instruction::UploadModel { .. } => Stage::UploadModel,
            Instruction::CleanConfig => Stage::CleanConfig,
        }
    }

    /// Gets the kind of message that carries the instruction.
    pub fn message_type(&self) -> MessageType {
        self.stage().message_type()
    }

    /// Encodes the instruction into the content of a request.
    pub fn into_record_set(self) -> RecordSet {
        let stage = self.stage();
        let mode = || ConfigsRecord::new().with(MODE_FIELD, stage.to_string());
        match self {
            Instruction::FilterClients { use_case } | Instruction::LoadData { use_case } => {
                RecordSet::new().with_config(mode().with("use_case", use_case))
            }
            Instruction::LoadModel {
                model_name,
                model_version,
            } => RecordSet::new().with_config(
                mode()
                    .with("model_name", model_name)
                    .with("model_version", model_version),
            ),
            Instruction::SetRunConfig {
                experiment_id,
                run_id,
                model_name,
                model_version,
            } => RecordSet::new().with_config(
                mode()
                    .with("experiment_id", experiment_id)
                    .with("run_id", run_id)
                    .with("model_name", model_name)
                    .with("model_version", model_version),
            ),
            Instruction::SetParameters { parameters } | Instruction::UploadModel { parameters } => {
                RecordSet::new()
                    .with_config(mode())
                    .with_parameters(parameters)
            }
            Instruction::Train {
                parameters,
                current_global_iter,
            } => RecordSet::new()
                .with_config(
                    ConfigsRecord::new().with("current_global_iter", i64::from(current_global_iter)),
                )
                .with_parameters(parameters),
            Instruction::PrepareData | Instruction::GetParameters | Instruction::CleanConfig => {
                RecordSet::new().with_config(mode())
            }
        }
    }

    /// Decodes the instruction of a request.
    ///
    /// # Errors
    /// Fails if the mode is unknown or if a field is missing or has the wrong type.
    pub fn decode(message_type: MessageType, content: &RecordSet) -> Result<Self, InstructionError> {
        let config = content.config()?;
        let stage = match message_type {
            MessageType::Train => Stage::Train,
            MessageType::Query => config.get_str(MODE_FIELD)?.parse()?,
            MessageType::Evaluate => {
                return Err(InstructionError::UnsupportedType(MessageType::Evaluate))
            }
        };
        let instruction = match stage {
            Stage::FilterClients => Instruction::FilterClients {
                use_case: config.get_str("use_case")?.to_string(),
            },
            Stage::LoadData => Instruction::LoadData {
                use_case: config.get_str("use_case")?.to_string(),
            },
            Stage::LoadModel => Instruction::LoadModel {
                model_name: config.get_str("model_name")?.to_string(),
                model_version: config.get_int("model_version")?,
            },
            Stage::PrepareData => Instruction::PrepareData,
            Stage::SetRunConfig => Instruction::SetRunConfig {
                experiment_id: config.get_str("experiment_id")?.to_string(),
                run_id: config.get_str("run_id")?.to_string(),
                model_name: config.get_str("model_name")?.to_string(),
                model_version: config.get_int("model_version")?,
            },
            Stage::GetParameters => Instruction::GetParameters,
            Stage::SetParameters => Instruction::SetParameters {
                parameters: content.parameters()?.clone(),
            },
            Stage::Train => {
                let current_global_iter = config.get_u32("current_global_iter")?;
                Instruction::Train {
                    parameters: content.parameters()?.clone(),
                    current_global_iter,
                }
            }
            Stage::UploadModel => Instruction::UploadModel {
                parameters: content.parameters()?.clone(),
            },
            Stage::CleanConfig => Instruction::CleanConfig,
        };
        Ok(instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{records::ConfigValue, testutils::records::parameters};

    fn roundtrip(instruction: Instruction) {
        let message_type = instruction.message_type();
        let content = instruction.clone().into_record_set();
        assert_eq!(Instruction::decode(message_type, &content).unwrap(), instruction);
    }

    #[test]
    fn test_every_stage_decodes_its_own_encoding() {
        roundtrip(Instruction::FilterClients {
            use_case: "iris".to_string(),
        });
        roundtrip(Instruction::LoadModel {
            model_name: "iris".to_string(),
            model_version: 1,
        });
        roundtrip(Instruction::SetRunConfig {
            experiment_id: "1".to_string(),
            run_id: "parent".to_string(),
            model_name: "iris".to_string(),
            model_version: 3,
        });
        roundtrip(Instruction::Train {
            parameters: parameters(1.0),
            current_global_iter: 2,
        });
        roundtrip(Instruction::UploadModel {
            parameters: parameters(0.5),
        });
        roundtrip(Instruction::CleanConfig);
    }

    #[test]
    fn test_wire_fields() {
        let content = Instruction::SetRunConfig {
            experiment_id: "7".to_string(),
            run_id: "abc".to_string(),
            model_name: "iris".to_string(),
            model_version: 1,
        }
        .into_record_set();
        let config = content.config().unwrap();
        assert_eq!(config.get_str("mode"), Ok("set_run_config"));
        assert_eq!(config.get_str("run_id"), Ok("abc"));
        assert_eq!(config.get_int("model_version"), Ok(1));

        let content = Instruction::Train {
            parameters: parameters(1.0),
            current_global_iter: 4,
        }
        .into_record_set();
        let config = content.config().unwrap();
        assert!(!config.contains_key("mode"));
        assert_eq!(config.get_int("current_global_iter"), Ok(4));
        assert_eq!(Stage::Train.message_type(), MessageType::Train);
    }

    #[test]
    fn test_unknown_mode() {
        let content = RecordSet::new().with_config(ConfigsRecord::new().with("mode", "evaluate"));
        assert_eq!(
            Instruction::decode(MessageType::Query, &content).unwrap_err(),
            InstructionError::UnknownMode(UnknownMode("evaluate".to_string()))
        );
    }

    #[test]
    fn test_evaluate_carries_no_instruction() {
        let content = RecordSet::new().with_config(ConfigsRecord::new());
        assert_eq!(
            Instruction::decode(MessageType::Evaluate, &content).unwrap_err(),
            InstructionError::UnsupportedType(MessageType::Evaluate)
        );
    }

    #[test]
    fn test_mistyped_fields_are_rejected() {
        let mut content = Instruction::Train {
            parameters: parameters(1.0),
            current_global_iter: 0,
        }
        .into_record_set();
        let mut config = content.config().unwrap().clone();
        config.insert("current_global_iter", ConfigValue::from("0"));
        content = content.with_config(config);

        assert_eq!(
            Instruction::decode(MessageType::Train, &content).unwrap_err(),
            InstructionError::Field(FieldError::TypeMismatch {
                key: "current_global_iter".to_string(),
                expected: "int",
                found: "str",
            })
        );

        let content = RecordSet::new().with_config(
            ConfigsRecord::new()
                .with("mode", "load_data")
                .with("use_case", 1_i64),
        );
        assert!(Instruction::decode(MessageType::Query, &content).is_err());
    }

    #[test]
    fn test_missing_parameters() {
        let content =
            RecordSet::new().with_config(ConfigsRecord::new().with("mode", "set_parameters"));
        assert_eq!(
            Instruction::decode(MessageType::Query, &content).unwrap_err(),
            InstructionError::Field(FieldError::Missing("parameters".to_string()))
        );
    }
}
