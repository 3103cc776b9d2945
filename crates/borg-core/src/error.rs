use thiserror::Error;

#[derive(Debug, Error)]
pub enum BorgError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Envelope validation failed: {0}")]
    Validation(String),

    #[error("Unknown thread: {id}")]
    UnknownThread { id: u32 },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Path escapes its root: {path}")]
    PathEscape { path: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BorgError>;
