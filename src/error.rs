use thiserror::Error;

/// Failures that can surface from the agent's own plumbing.
///
/// Only `Config` ever reaches the embedding application (at construction).
/// Everything else is logged and absorbed by the session.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to encode event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("push channel error: {0}")]
    Push(String),

    #[error("push channel is closed")]
    PushClosed,

    #[error("a tokio runtime is required to start a session")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
