use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// 发布端错误类型
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed by peer")]
    Closed,
}

pub type Result<T> = std::result::Result<T, PublishError>;
