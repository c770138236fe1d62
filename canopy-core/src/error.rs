use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum CanopyError {
    /// Every repair strategy was tried and the model output still does not
    /// parse. `raw` keeps the original text for diagnostics.
    #[error("all JSON repair strategies exhausted at position {position}: {detail}")]
    UnrecoverableFormat {
        position: usize,
        detail: String,
        raw: String,
    },

    #[error("no usable relation edges in model output: {0}")]
    InvalidEdgeFormat(String),

    #[error("document too short to extract knowledge from ({length} chars, minimum {minimum})")]
    EmptyDocument { length: usize, minimum: usize },

    #[error("topology {0} not found")]
    TopologyNotFound(uuid::Uuid),

    #[error("a build is already in flight for topology {0}")]
    BuildInFlight(uuid::Uuid),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Other error: {0}")]
    Other(String),
}
