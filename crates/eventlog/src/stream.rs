//! Stream lifecycle configuration: the single `MEDIA_EVENTS` stream and the
//! consumer settings subscribers bind with.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage backing a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    File,
    Memory,
}

/// Retention policy for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Age/size/count limits, discarding the oldest messages once exceeded.
    LimitsDiscardOld,
}

/// Configuration for the durable event log stream. `ensure_stream` (see
/// [`crate::broker::Broker::ensure_stream`]) is idempotent: it creates the
/// stream if absent, updates it in place if the configuration changed, and
/// otherwise leaves it untouched.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub name: String,
    pub subjects: Vec<String>,
    pub max_age: Duration,
    pub max_bytes: i64,
    pub max_msgs: i64,
    pub storage: StorageType,
    pub replicas: usize,
    pub retention: RetentionPolicy,
    pub duplicate_window: Duration,
    pub allow_direct_get: bool,
    pub allow_rollup: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "MEDIA_EVENTS".to_string(),
            subjects: vec![
                "playback.>".to_string(),
                "plex.>".to_string(),
                "jellyfin.>".to_string(),
                "tautulli.>".to_string(),
            ],
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_bytes: 10 * 1024 * 1024 * 1024,
            max_msgs: -1,
            storage: StorageType::File,
            replicas: 1,
            retention: RetentionPolicy::LimitsDiscardOld,
            duplicate_window: Duration::from_secs(120),
            allow_direct_get: true,
            allow_rollup: true,
        }
    }
}

/// A message as delivered by the durable log, independent of the broker
/// that stored it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Monotonically increasing sequence number within the stream.
    pub sequence: u64,
    pub subject: String,
    pub payload: Vec<u8>,
    /// Multi-map headers; `Nats-Msg-Id` carries the dedup key.
    pub headers: HashMap<String, Vec<String>>,
    pub timestamp: DateTime<Utc>,
}

impl StreamMessage {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.first()).map(String::as_str)
    }
}
