//! `async-nats` JetStream implementation of [`Broker`]. Grounded in the
//! stream/consumer configuration shape used for NATS infrastructure event
//! streams elsewhere in the ecosystem; adapted here to durable, queue-group
//! pull consumers and direct-get reads.

use std::collections::HashMap;

use async_nats::jetstream::{self, consumer::pull, stream::LastRawMessageErrorKind};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::broker::{
    AckHandle, Broker, DeliverPolicy as OurDeliverPolicy, IncomingMessage, MessageStream,
    QueryOptions, SubscribeConfig,
};
use crate::error::EventLogError;
use crate::stream::{RetentionPolicy, StorageType, StreamConfig, StreamMessage};

pub struct NatsBroker {
    jetstream: jetstream::Context,
}

impl NatsBroker {
    pub fn new(jetstream: jetstream::Context) -> Self {
        Self { jetstream }
    }

    pub async fn connect(url: &str) -> Result<Self, EventLogError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| EventLogError::Stream(format!("connect to {url}: {e}")))?;
        Ok(Self::new(jetstream::new(client)))
    }
}

fn to_nats_storage(storage: StorageType) -> jetstream::stream::StorageType {
    match storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    }
}

fn to_nats_retention(retention: RetentionPolicy) -> jetstream::stream::RetentionPolicy {
    match retention {
        RetentionPolicy::LimitsDiscardOld => jetstream::stream::RetentionPolicy::Limits,
    }
}

struct NatsAckHandle {
    message: jetstream::Message,
}

#[async_trait]
impl AckHandle for NatsAckHandle {
    async fn ack(&self) -> Result<(), EventLogError> {
        self.message.ack().await.map_err(|e| EventLogError::Subscribe(e.to_string()))
    }

    async fn nack(&self) -> Result<(), EventLogError> {
        self.message
            .ack_with(jetstream::AckKind::Nak(None))
            .await
            .map_err(|e| EventLogError::Subscribe(e.to_string()))
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn ensure_stream(&self, config: &StreamConfig) -> Result<(), EventLogError> {
        let stream_config = jetstream::stream::Config {
            name: config.name.clone(),
            subjects: config.subjects.clone(),
            max_age: config.max_age,
            max_bytes: config.max_bytes,
            max_messages: config.max_msgs,
            storage: to_nats_storage(config.storage),
            num_replicas: config.replicas,
            retention: to_nats_retention(config.retention),
            duplicate_window: config.duplicate_window,
            allow_direct: config.allow_direct_get,
            allow_rollup: config.allow_rollup,
            discard: jetstream::stream::DiscardPolicy::Old,
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| EventLogError::Stream(e.to_string()))?;
        Ok(())
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<u64, EventLogError> {
        let mut nats_headers = async_nats::HeaderMap::new();
        for (key, value) in headers {
            nats_headers.insert(key.as_str(), value.as_str());
        }

        let ack = self
            .jetstream
            .publish_with_headers(subject.to_string(), nats_headers, payload.into())
            .await
            .map_err(|e| EventLogError::Publish(e.to_string()))?
            .await
            .map_err(|e| EventLogError::Publish(e.to_string()))?;

        if ack.duplicate {
            debug!(subject, sequence = ack.sequence, "broker-side duplicate suppressed");
        }
        Ok(ack.sequence)
    }

    async fn subscribe(&self, config: SubscribeConfig) -> Result<MessageStream, EventLogError> {
        let stream = self
            .jetstream
            .get_stream(&config.stream)
            .await
            .map_err(|_| {
                EventLogError::Subscribe(format!(
                    "wildcard subscribe on {} requires stream {} to already exist",
                    config.filter_subject, config.stream
                ))
            })?;

        let deliver_policy = match config.deliver_policy {
            OurDeliverPolicy::All => jetstream::consumer::DeliverPolicy::All,
            OurDeliverPolicy::New => jetstream::consumer::DeliverPolicy::New,
        };

        let consumer = stream
            .get_or_create_consumer(
                &config.durable_name,
                pull::Config {
                    durable_name: Some(config.durable_name.clone()),
                    filter_subject: config.filter_subject.clone(),
                    deliver_policy,
                    max_deliver: config.max_deliver,
                    max_ack_pending: config.max_ack_pending,
                    ack_wait: config.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EventLogError::Subscribe(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| EventLogError::Subscribe(e.to_string()))?
            .filter_map(|result| async move {
                match result {
                    Ok(message) => {
                        let headers = message
                            .headers
                            .as_ref()
                            .map(|h| {
                                h.iter()
                                    .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                                    .collect()
                            })
                            .unwrap_or_default();
                        let info = message.info().ok();
                        let sequence = info.map(|i| i.stream_sequence).unwrap_or(0);
                        let timestamp = info
                            .and_then(|i| Utc.timestamp_opt(i.published.unix_timestamp(), 0).single())
                            .unwrap_or_else(Utc::now);

                        let stream_message = StreamMessage {
                            sequence,
                            subject: message.subject.to_string(),
                            payload: message.payload.to_vec(),
                            headers,
                            timestamp,
                        };
                        Some(IncomingMessage {
                            message: stream_message,
                            handle: Box::new(NatsAckHandle { message }),
                        })
                    }
                    Err(e) => {
                        warn!("pull consumer delivery error: {e}");
                        None
                    }
                }
            });

        Ok(Box::pin(messages))
    }

    async fn get_message(&self, stream: &str, seq: u64) -> Result<StreamMessage, EventLogError> {
        let stream_handle = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(|e| EventLogError::Stream(e.to_string()))?;

        let raw = stream_handle.get_raw_message(seq).await.map_err(|e| {
            if e.kind() == LastRawMessageErrorKind::NoMessageFound {
                EventLogError::NotFound { stream: stream.to_string(), seq }
            } else {
                EventLogError::Stream(e.to_string())
            }
        })?;

        Ok(StreamMessage {
            sequence: raw.sequence,
            subject: raw.subject,
            payload: raw.payload.to_vec(),
            headers: raw
                .headers
                .map(|h| h.iter().map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect())).collect())
                .unwrap_or_default(),
            timestamp: Utc.timestamp_opt(raw.time.unix_timestamp(), 0).single().unwrap_or_else(Utc::now),
        })
    }

    async fn get_last_sequence(&self, stream: &str) -> Result<u64, EventLogError> {
        let mut stream_handle = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(|e| EventLogError::Stream(e.to_string()))?;
        let info = stream_handle.info().await.map_err(|e| EventLogError::Stream(e.to_string()))?;
        Ok(info.state.last_sequence)
    }

    async fn query(&self, stream: &str, options: QueryOptions) -> Result<Vec<StreamMessage>, EventLogError> {
        let last = self.get_last_sequence(stream).await?;
        let start = options.start_seq.unwrap_or(1);
        let end = options.end_seq.unwrap_or(last);
        let limit = options.limit.unwrap_or(usize::MAX);

        let mut out = Vec::new();
        let mut seq = start;
        while seq <= end && out.len() < limit {
            match self.get_message(stream, seq).await {
                Ok(message) => {
                    let in_time_range = options.start_time.map_or(true, |t| message.timestamp >= t)
                        && options.end_time.map_or(true, |t| message.timestamp <= t);
                    let in_subject = options
                        .subject
                        .as_deref()
                        .map_or(true, |subj| message.subject == subj || message.subject.starts_with(subj));
                    if in_time_range && in_subject {
                        out.push(message);
                    }
                }
                Err(EventLogError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            seq += 1;
        }
        Ok(out)
    }
}
