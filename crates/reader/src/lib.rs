//! Resilient reader (C10): two query paths against the durable log —
//! primary (direct broker query) and fallback (an alternate query path
//! against the same stream) — with a breaker guarding the primary and a
//! background probe that flips it back on once the primary recovers.

pub mod error;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use eventlog::{Broker, QueryOptions, StreamMessage};
use health::{ComponentHealth, HealthCheckable};
use parking_lot::RwLock;
use resilience::CircuitBreaker;
use tracing::{info, warn};

pub use error::ReaderError;

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub stream: String,
    /// How often the background probe re-checks the primary path once the
    /// breaker has tripped.
    pub health_check_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self { stream: "MEDIA_EVENTS".to_string(), health_check_interval: Duration::from_secs(30) }
    }
}

#[derive(Default)]
struct Stats {
    primary_queries: AtomicU64,
    fallback_queries: AtomicU64,
    fallback_count: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub primary_queries: u64,
    pub fallback_queries: u64,
    pub fallback_count: u64,
}

/// Queries the durable log with automatic fallback. `primary_ok` tracks
/// whether the breaker is closed AND the last background probe succeeded
/// within `health_check_interval`; when false, every operation goes
/// straight to the fallback path without touching primary.
pub struct ResilientReader {
    primary: Arc<dyn Broker>,
    fallback: Arc<dyn Broker>,
    breaker: CircuitBreaker,
    config: ReaderConfig,
    stats: Stats,
    primary_ok: AtomicBool,
    last_probe: RwLock<Instant>,
}

impl ResilientReader {
    pub fn new(primary: Arc<dyn Broker>, fallback: Arc<dyn Broker>, breaker: CircuitBreaker, config: ReaderConfig) -> Self {
        Self {
            primary,
            fallback,
            breaker,
            config,
            stats: Stats::default(),
            primary_ok: AtomicBool::new(true),
            last_probe: RwLock::new(Instant::now()),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            primary_queries: self.stats.primary_queries.load(Ordering::Relaxed),
            fallback_queries: self.stats.fallback_queries.load(Ordering::Relaxed),
            fallback_count: self.stats.fallback_count.load(Ordering::Relaxed),
        }
    }

    pub fn fallback_count(&self) -> u64 {
        self.stats.fallback_count.load(Ordering::Relaxed)
    }

    /// `true` if the breaker is closed and the last probe (or last live
    /// call) within `health_check_interval` succeeded.
    pub fn primary_ok(&self) -> bool {
        self.primary_ok.load(Ordering::Relaxed) && self.breaker.try_admit()
    }

    pub async fn query(&self, stream: &str, options: QueryOptions) -> Result<Vec<StreamMessage>, ReaderError> {
        self.run(
            || {
                let options = options.clone();
                async move { self.primary.query(stream, options).await }
            },
            || {
                let options = options.clone();
                async move { self.fallback.query(stream, options).await }
            },
        )
        .await
    }

    pub async fn get_message(&self, stream: &str, seq: u64) -> Result<StreamMessage, ReaderError> {
        self.run(
            || async move { self.primary.get_message(stream, seq).await },
            || async move { self.fallback.get_message(stream, seq).await },
        )
        .await
    }

    pub async fn get_last_sequence(&self, stream: &str) -> Result<u64, ReaderError> {
        self.run(
            || async move { self.primary.get_last_sequence(stream).await },
            || async move { self.fallback.get_last_sequence(stream).await },
        )
        .await
    }

    async fn run<T, PF, FF, PFut, FFut>(&self, primary: PF, fallback: FF) -> Result<T, ReaderError>
    where
        PF: FnOnce() -> PFut,
        FF: FnOnce() -> FFut,
        PFut: std::future::Future<Output = Result<T, eventlog::EventLogError>>,
        FFut: std::future::Future<Output = Result<T, eventlog::EventLogError>>,
    {
        if self.primary_ok() {
            self.stats.primary_queries.fetch_add(1, Ordering::Relaxed);
            match primary().await {
                Ok(result) => {
                    self.breaker.record_success();
                    return Ok(result);
                }
                Err(e) => {
                    warn!("primary query failed, falling back: {e}");
                    self.breaker.record_failure();
                }
            }
        }

        self.stats.fallback_queries.fetch_add(1, Ordering::Relaxed);
        self.stats.fallback_count.fetch_add(1, Ordering::Relaxed);
        fallback().await.map_err(ReaderError::Fallback)
    }

    /// Probe the primary path once. Intended to be driven by
    /// [`ResilientReader::run_health_probe`] on a timer.
    pub async fn probe(&self) {
        *self.last_probe.write() = Instant::now();
        match self.primary.get_last_sequence(&self.config.stream).await {
            Ok(_) => {
                if !self.primary_ok.load(Ordering::Relaxed) {
                    info!("resilient reader: primary probe succeeded, marking primary_ok");
                }
                self.primary_ok.store(true, Ordering::Relaxed);
                self.breaker.record_success();
            }
            Err(e) => {
                warn!("resilient reader: primary probe failed: {e}");
                self.primary_ok.store(false, Ordering::Relaxed);
                self.breaker.record_failure();
            }
        }
    }

    /// Runs [`ResilientReader::probe`] on `health_check_interval` until
    /// `shutdown` is notified.
    pub async fn run_health_probe(self: &Arc<Self>, shutdown: Arc<tokio::sync::Notify>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.health_check_interval) => {
                    self.probe().await;
                }
                _ = shutdown.notified() => return,
            }
        }
    }
}

#[async_trait]
impl HealthCheckable for ResilientReader {
    async fn check_health(&self) -> ComponentHealth {
        if self.primary_ok() {
            ComponentHealth::healthy("primary path serving")
        } else {
            ComponentHealth::degraded(format!(
                "primary path unavailable, serving from fallback (fallback_count={})",
                self.fallback_count()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventlog::{FakeBroker, StreamConfig};
    use resilience::CircuitBreakerConfig;

    async fn broker_with_stream() -> Arc<FakeBroker> {
        let broker = Arc::new(FakeBroker::new());
        broker.ensure_stream(&StreamConfig::default()).await.unwrap();
        broker
    }

    #[tokio::test]
    async fn query_uses_primary_when_healthy() {
        let primary = broker_with_stream().await;
        primary.publish("playback.plex.movie", b"{}".to_vec(), Default::default()).await.unwrap();
        let fallback = broker_with_stream().await;

        let reader = ResilientReader::new(
            primary.clone(),
            fallback,
            CircuitBreaker::new(CircuitBreakerConfig::default()),
            ReaderConfig::default(),
        );

        let result = reader.query("MEDIA_EVENTS", QueryOptions::default()).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(reader.stats().primary_queries, 1);
        assert_eq!(reader.fallback_count(), 0);
    }

    #[tokio::test]
    async fn falls_back_when_primary_stream_missing() {
        let primary = Arc::new(FakeBroker::new());
        let fallback = broker_with_stream().await;
        fallback.publish("playback.plex.movie", b"{}".to_vec(), Default::default()).await.unwrap();

        let reader = ResilientReader::new(
            primary,
            fallback,
            CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, ..Default::default() }),
            ReaderConfig::default(),
        );

        let result = reader.query("MEDIA_EVENTS", QueryOptions::default()).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(reader.fallback_count(), 1);
    }

    #[tokio::test]
    async fn breaker_open_skips_primary_entirely() {
        let primary = Arc::new(FakeBroker::new());
        let fallback = broker_with_stream().await;

        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_secs(60),
            ..Default::default()
        });
        let reader =
            ResilientReader::new(primary, fallback, breaker, ReaderConfig::default());

        let _ = reader.get_last_sequence("MEDIA_EVENTS").await;
        assert!(!reader.primary_ok());

        let before = reader.stats().primary_queries;
        let _ = reader.get_last_sequence("MEDIA_EVENTS").await;
        assert_eq!(reader.stats().primary_queries, before);
    }

    #[tokio::test]
    async fn probe_recovers_primary_ok() {
        let primary = broker_with_stream().await;
        let fallback = broker_with_stream().await;

        let reader = Arc::new(ResilientReader::new(
            primary,
            fallback,
            CircuitBreaker::new(CircuitBreakerConfig::default()),
            ReaderConfig::default(),
        ));

        reader.primary_ok.store(false, Ordering::Relaxed);
        reader.probe().await;
        assert!(reader.primary_ok());
    }
}
