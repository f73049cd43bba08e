//! Process configuration: the `NATS_*` environment surface plus the admin
//! HTTP port, loaded the way `messaging-service/src/config.rs` and
//! `analytics-service/src/services/outbox.rs::OutboxConfig` do it — a
//! typed struct with explicit defaults, `std::env::var` one field at a
//! time, no derive-based env framework. Every variable defaults when
//! unset, so loading never fails.

use std::time::Duration;

use eventlog::{RetentionPolicy, StorageType, StreamConfig};
use ingest::{AppenderConfig, ConsumerConfig};

const GIB: i64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub nats_enabled: bool,
    pub nats_url: String,
    /// Captured for parity with the environment surface; this workspace's
    /// broker seam (`eventlog::Broker`) swaps between `FakeBroker` and a
    /// client to an externally-run NATS server, not an in-process
    /// embedded server, so this flag only affects startup logging.
    pub nats_embedded: bool,
    pub nats_store_dir: String,
    pub nats_max_memory: i64,
    pub nats_max_store: i64,
    pub retention_days: u64,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub subscribers: usize,
    pub durable_name: String,
    pub queue_group: String,
    pub http_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nats_enabled: false,
            nats_url: "nats://127.0.0.1:4222".to_string(),
            nats_embedded: true,
            nats_store_dir: "/data/nats/jetstream".to_string(),
            nats_max_memory: GIB,
            nats_max_store: 10 * GIB,
            retention_days: 7,
            batch_size: 1000,
            flush_interval: Duration::from_secs(5),
            subscribers: 4,
            durable_name: "media-processor".to_string(),
            queue_group: "processors".to_string(),
            http_port: 8000,
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let default = Self::default();

        Self {
            nats_enabled: env_bool("NATS_ENABLED", default.nats_enabled),
            nats_url: std::env::var("NATS_URL").unwrap_or(default.nats_url),
            nats_embedded: env_bool("NATS_EMBEDDED", default.nats_embedded),
            nats_store_dir: std::env::var("NATS_STORE_DIR").unwrap_or(default.nats_store_dir),
            nats_max_memory: env_parsed("NATS_MAX_MEMORY", default.nats_max_memory),
            nats_max_store: env_parsed("NATS_MAX_STORE", default.nats_max_store),
            retention_days: env_parsed("NATS_RETENTION_DAYS", default.retention_days),
            batch_size: env_parsed("NATS_BATCH_SIZE", default.batch_size),
            flush_interval: Duration::from_secs(env_parsed("NATS_FLUSH_INTERVAL", 5)),
            subscribers: env_parsed("NATS_SUBSCRIBERS", default.subscribers),
            durable_name: std::env::var("NATS_DURABLE_NAME").unwrap_or(default.durable_name),
            queue_group: std::env::var("NATS_QUEUE_GROUP").unwrap_or(default.queue_group),
            http_port: env_parsed("PORT", default.http_port),
        }
    }

    /// The single `MEDIA_EVENTS` stream configuration, derived from this
    /// config's retention/size knobs (§6: subjects, file storage, limits
    /// retention with discard-old, `duplicate_window` 2 min,
    /// `allow_direct_get` true — needed by the resilient reader).
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            name: "MEDIA_EVENTS".to_string(),
            subjects: vec![
                "playback.>".to_string(),
                "plex.>".to_string(),
                "jellyfin.>".to_string(),
                "tautulli.>".to_string(),
                "dlq.>".to_string(),
                "system.health.>".to_string(),
            ],
            max_age: Duration::from_secs(self.retention_days * 24 * 60 * 60),
            max_bytes: self.nats_max_store,
            max_msgs: -1,
            storage: StorageType::File,
            replicas: 1,
            retention: RetentionPolicy::LimitsDiscardOld,
            duplicate_window: Duration::from_secs(120),
            allow_direct_get: true,
            allow_rollup: true,
        }
    }

    pub fn appender_config(&self) -> AppenderConfig {
        AppenderConfig { batch_size: self.batch_size, flush_interval: self.flush_interval }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            subscribe: eventlog::SubscribeConfig {
                stream: "MEDIA_EVENTS".to_string(),
                durable_name: self.durable_name.clone(),
                queue_group: self.queue_group.clone(),
                filter_subject: "playback.>".to_string(),
                deliver_policy: eventlog::DeliverPolicy::New,
                ack_policy: eventlog::AckPolicy::Explicit,
                max_deliver: 5,
                max_ack_pending: 1000,
                ack_wait: Duration::from_secs(30),
            },
            worker_count: self.subscribers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_external_interface_section() {
        let config = Config::default();
        assert!(!config.nats_enabled);
        assert_eq!(config.nats_url, "nats://127.0.0.1:4222");
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.subscribers, 4);
        assert_eq!(config.durable_name, "media-processor");
        assert_eq!(config.queue_group, "processors");
    }

    #[test]
    fn stream_config_derives_from_retention_and_size() {
        let config = Config { retention_days: 14, nats_max_store: 5 * GIB, ..Config::default() };
        let stream = config.stream_config();
        assert_eq!(stream.max_age, Duration::from_secs(14 * 24 * 60 * 60));
        assert_eq!(stream.max_bytes, 5 * GIB);
        assert!(stream.allow_direct_get);
    }
}
