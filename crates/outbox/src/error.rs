use thiserror::Error;

pub type OutboxResult<T> = Result<T, OutboxError>;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox message not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    EventLog(#[from] eventlog::EventLogError),

    #[error("publish failed: {0}")]
    Publish(String),
}
