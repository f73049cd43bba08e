use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    EventLog(#[from] eventlog::EventLogError),

    #[error(transparent)]
    Model(#[from] model::ModelError),

    #[error("no handler registered for topic {0}")]
    NoHandler(String),

    #[error("dlq publish failed: {0}")]
    DlqPublish(String),
}
