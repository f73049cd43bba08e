use chrono::{DateTime, Utc};

/// Delivery state of an [`OutboxMessage`]. `Delivered` is terminal; `Failed`
/// is retried by the forwarder until `max_retries`, at which point it's left
/// in place for operator inspection rather than silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Failed,
}

/// A locally-buffered message awaiting publish. Reserved for signals that
/// must survive a broker outage — DLQ-quarantine notices and stream-health
/// events — not the hot `MediaEvent` path, which publishes directly (see
/// the router's DLQ handling and `crates/eventlog::Publisher`).
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    pub id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxMessage {
    pub fn new(id: impl Into<String>, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            topic: topic.into(),
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
