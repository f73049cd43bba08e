use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store insert failed: {0}")]
    StoreInsert(String),

    #[error(transparent)]
    EventLog(#[from] eventlog::EventLogError),

    #[error(transparent)]
    Model(#[from] model::ModelError),
}
