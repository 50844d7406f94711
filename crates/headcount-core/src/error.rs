use thiserror::Error;

/// 计数核心统一错误类型
#[derive(Error, Debug)]
pub enum CountError {
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, CountError>;

impl<T> From<tokio::sync::broadcast::error::SendError<T>> for CountError {
    fn from(err: tokio::sync::broadcast::error::SendError<T>) -> Self {
        CountError::ChannelSend(err.to_string())
    }
}
