use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<sqlx::Error> for AgentError {
    fn from(err: sqlx::Error) -> Self {
        AgentError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Llm(err.to_string())
    }
}

impl AgentError {
    /// Message text without the variant prefix, used when the error is
    /// surfaced to the repair loop as raw collaborator output.
    pub fn detail(&self) -> String {
        match self {
            AgentError::Config(msg)
            | AgentError::Database(msg)
            | AgentError::Llm(msg)
            | AgentError::Schema(msg)
            | AgentError::Internal(msg) => msg.clone(),
            AgentError::Io(err) => err.to_string(),
            AgentError::Json(err) => err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
