//! In-memory broker for unit and integration tests. Mirrors the subset of
//! JetStream semantics this crate depends on: durable streams, per-subject
//! matching, `Nats-Msg-Id` dedup within a window, and queue-group
//! round-robin delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::broker::{AckHandle, Broker, DeliverPolicy, IncomingMessage, MessageStream, QueryOptions, SubscribeConfig};
use crate::error::EventLogError;
use crate::stream::{StreamConfig, StreamMessage};

struct StreamState {
    config: StreamConfig,
    messages: Vec<StreamMessage>,
    dedup: HashMap<String, Instant>,
    // queue_group -> (senders, next round-robin index)
    subscribers: HashMap<String, (Vec<mpsc::UnboundedSender<StreamMessage>>, usize)>,
}

#[derive(Clone, Default)]
pub struct FakeBroker {
    streams: Arc<Mutex<HashMap<String, StreamState>>>,
}

struct NoopAckHandle;

#[async_trait]
impl AckHandle for NoopAckHandle {
    async fn ack(&self) -> Result<(), EventLogError> {
        Ok(())
    }

    async fn nack(&self) -> Result<(), EventLogError> {
        Ok(())
    }
}

fn subject_matches(filter: &str, subject: &str) -> bool {
    if let Some(prefix) = filter.strip_suffix(".>") {
        return subject == prefix || subject.starts_with(&format!("{prefix}."));
    }
    filter == subject
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn ensure_stream(&self, config: &StreamConfig) -> Result<(), EventLogError> {
        let mut streams = self.streams.lock();
        streams
            .entry(config.name.clone())
            .and_modify(|s| s.config = config.clone())
            .or_insert_with(|| StreamState {
                config: config.clone(),
                messages: Vec::new(),
                dedup: HashMap::new(),
                subscribers: HashMap::new(),
            });
        Ok(())
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<u64, EventLogError> {
        let mut streams = self.streams.lock();
        let stream_name = streams
            .iter()
            .find(|(_, s)| s.config.subjects.iter().any(|pat| subject_matches(pat, subject)))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| EventLogError::Publish(format!("no stream bound to subject {subject}")))?;
        let stream = streams.get_mut(&stream_name).expect("looked up above");

        if let Some(msg_id) = headers.get("Nats-Msg-Id") {
            let window = stream.config.duplicate_window;
            if let Some(seen_at) = stream.dedup.get(msg_id) {
                if seen_at.elapsed() < window {
                    // Within the duplicate window: broker-side dedup, no
                    // new sequence assigned, no delivery.
                    return Ok(stream.messages.len() as u64);
                }
            }
            stream.dedup.insert(msg_id.clone(), Instant::now());
        }

        let sequence = stream.messages.len() as u64 + 1;
        let message = StreamMessage {
            sequence,
            subject: subject.to_string(),
            payload,
            headers: headers.into_iter().map(|(k, v)| (k, vec![v])).collect(),
            timestamp: Utc::now(),
        };
        stream.messages.push(message.clone());

        for (group, (senders, next)) in stream.subscribers.iter_mut() {
            if senders.is_empty() {
                continue;
            }
            let filtered: Vec<usize> = (0..senders.len()).collect();
            if filtered.is_empty() {
                continue;
            }
            let idx = *next % senders.len();
            *next = (*next + 1) % senders.len();
            let _ = senders[idx].send(message.clone());
            tracing::trace!(group, sequence, "delivered to queue group member");
        }

        Ok(sequence)
    }

    async fn subscribe(&self, config: SubscribeConfig) -> Result<MessageStream, EventLogError> {
        if config.filter_subject.ends_with(".>") {
            let exists = self.streams.lock().contains_key(&config.stream);
            if !exists {
                return Err(EventLogError::Subscribe(format!(
                    "wildcard subscribe on {} requires stream {} to already exist",
                    config.filter_subject, config.stream
                )));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut streams = self.streams.lock();
            let stream = streams
                .get_mut(&config.stream)
                .ok_or_else(|| EventLogError::Subscribe(format!("unknown stream {}", config.stream)))?;

            if config.deliver_policy == DeliverPolicy::All {
                for message in stream.messages.iter().filter(|m| subject_matches(&config.filter_subject, &m.subject)) {
                    let _ = tx.send(message.clone());
                }
            }

            stream
                .subscribers
                .entry(config.queue_group.clone())
                .or_insert_with(|| (Vec::new(), 0))
                .0
                .push(tx);
        }

        let stream = UnboundedReceiverStream::new(rx).map(|message| IncomingMessage {
            message,
            handle: Box::new(NoopAckHandle),
        });

        Ok(Box::pin(stream))
    }

    async fn get_message(&self, stream: &str, seq: u64) -> Result<StreamMessage, EventLogError> {
        let streams = self.streams.lock();
        let stream = streams
            .get(stream)
            .ok_or_else(|| EventLogError::NotFound { stream: stream.to_string(), seq })?;
        stream
            .messages
            .iter()
            .find(|m| m.sequence == seq)
            .cloned()
            .ok_or_else(|| EventLogError::NotFound { stream: stream.config.name.clone(), seq })
    }

    async fn get_last_sequence(&self, stream: &str) -> Result<u64, EventLogError> {
        let streams = self.streams.lock();
        Ok(streams.get(stream).map(|s| s.messages.len() as u64).unwrap_or(0))
    }

    async fn query(&self, stream: &str, options: QueryOptions) -> Result<Vec<StreamMessage>, EventLogError> {
        let streams = self.streams.lock();
        let stream = streams
            .get(stream)
            .ok_or_else(|| EventLogError::Stream(format!("unknown stream {stream}")))?;

        let mut out: Vec<StreamMessage> = stream
            .messages
            .iter()
            .filter(|m| options.start_seq.map_or(true, |s| m.sequence >= s))
            .filter(|m| options.end_seq.map_or(true, |s| m.sequence <= s))
            .filter(|m| options.start_time.map_or(true, |t| m.timestamp >= t))
            .filter(|m| options.end_time.map_or(true, |t| m.timestamp <= t))
            .filter(|m| options.subject.as_deref().map_or(true, |subj| subject_matches(subj, &m.subject)))
            .cloned()
            .collect();

        if let Some(limit) = options.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}
