use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("circuit breaker is open")]
    BreakerOpen,

    #[error("stream error: {0}")]
    Stream(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("message not found: stream={stream} seq={seq}")]
    NotFound { stream: String, seq: u64 },

    #[error("invalid subject: {0}")]
    InvalidSubject(String),

    #[error(transparent)]
    Model(#[from] model::ModelError),
}
