use thiserror::Error;

use crate::backlog::{ActionId, ActionStatus};

#[derive(Error, Debug)]
pub enum CortexError {
    #[error("Unknown action: {id}")]
    UnknownAction { id: ActionId },

    #[error("Invalid transition for action {id}: status is {status:?}, expected {expected:?}")]
    InvalidTransition {
        id: ActionId,
        status: ActionStatus,
        expected: ActionStatus,
    },

    #[error("Validation failed: action={action_type}, {message}")]
    Validation {
        action_type: String,
        message: String,
    },

    #[error("Dispatch error: action={action_type}, {message}")]
    Dispatch {
        action_type: String,
        message: String,
    },

    #[error("Decision provider error: {0}")]
    Provider(String),

    #[error("Summarizer error: {0}")]
    Summarizer(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type CortexResult<T> = Result<T, CortexError>;
