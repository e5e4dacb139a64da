use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrawSyncError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DrawSyncError>;
