use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    #[error("Invalid job state: {0}")]
    InvalidJobState(String),

    #[error("{0}")]
    Other(String),
}
