//! Broker abstraction. The publisher, subscriber and resilient reader all
//! depend on this trait rather than on `async-nats` directly, so tests run
//! against [`crate::fake_broker::FakeBroker`] without a live NATS server —
//! the dependency-injection seam that replaces the source's build-tag
//! stub duality.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::EventLogError;
use crate::stream::{StreamConfig, StreamMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverPolicy {
    All,
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    Explicit,
    None,
}

/// Durable consumer configuration. Subscribing on a wildcard filter
/// subject (e.g. `playback.>`) requires the target stream to already
/// exist — auto-provisioning a stream from a wildcard subscribe is
/// forbidden, so [`crate::broker::Broker::subscribe`] errors if it does.
#[derive(Debug, Clone)]
pub struct SubscribeConfig {
    pub stream: String,
    pub durable_name: String,
    pub queue_group: String,
    pub filter_subject: String,
    pub deliver_policy: DeliverPolicy,
    pub ack_policy: AckPolicy,
    pub max_deliver: i64,
    pub max_ack_pending: i64,
    pub ack_wait: Duration,
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            stream: "MEDIA_EVENTS".to_string(),
            durable_name: "media-processor".to_string(),
            queue_group: "processors".to_string(),
            filter_subject: "playback.>".to_string(),
            deliver_policy: DeliverPolicy::New,
            ack_policy: AckPolicy::Explicit,
            max_deliver: 5,
            max_ack_pending: 1000,
            ack_wait: Duration::from_secs(30),
        }
    }
}

/// Explicit ack/nack handle for a delivered message. No implicit
/// timeout-ack: the handler decides.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(&self) -> Result<(), EventLogError>;
    async fn nack(&self) -> Result<(), EventLogError>;
}

pub struct IncomingMessage {
    pub message: StreamMessage,
    pub handle: Box<dyn AckHandle>,
}

pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// Options for [`Broker::query`], used by the resilient reader's primary
/// path.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub start_seq: Option<u64>,
    pub end_seq: Option<u64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    pub limit: Option<usize>,
    /// Maps a result-column name to a JSON path expression extracted from
    /// the payload.
    pub json_extract: HashMap<String, String>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Idempotent: create if absent, update in place if present, propagate
    /// other errors.
    async fn ensure_stream(&self, config: &StreamConfig) -> Result<(), EventLogError>;

    /// Publish `payload` on `subject` with `headers` attached (including
    /// `Nats-Msg-Id` for broker-side dedup). Returns the assigned sequence.
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<u64, EventLogError>;

    /// Bind a durable, queue-group consumer and yield a lazy stream of
    /// messages. Errors if `config.filter_subject` is a wildcard and
    /// `config.stream` does not already exist.
    async fn subscribe(&self, config: SubscribeConfig) -> Result<MessageStream, EventLogError>;

    async fn get_message(&self, stream: &str, seq: u64) -> Result<StreamMessage, EventLogError>;

    async fn get_last_sequence(&self, stream: &str) -> Result<u64, EventLogError>;

    async fn query(
        &self,
        stream: &str,
        options: QueryOptions,
    ) -> Result<Vec<StreamMessage>, EventLogError>;
}
