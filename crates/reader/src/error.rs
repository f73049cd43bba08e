use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("primary query failed: {0}")]
    Primary(eventlog::EventLogError),

    #[error("fallback query failed: {0}")]
    Fallback(eventlog::EventLogError),
}
