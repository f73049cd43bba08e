//! Batch appender (C6): accumulate events in memory, flush by size or
//! interval, retry a failed flush once synchronously, then surrender the
//! batch to the caller so it can be routed to the DLQ.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use model::MediaEvent;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{error, warn};

use crate::store::Store;

#[derive(Debug, Clone)]
pub struct AppenderConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self { batch_size: 1000, flush_interval: Duration::from_secs(5) }
    }
}

/// Atomic counters safe for concurrent read while the appender runs.
#[derive(Default)]
pub struct Stats {
    pub events_received: AtomicU64,
    pub events_flushed: AtomicU64,
    pub flush_count: AtomicU64,
    pub error_count: AtomicU64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_flushed: self.events_flushed.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub events_received: u64,
    pub events_flushed: u64,
    pub flush_count: u64,
    pub error_count: u64,
}

/// A batch that failed to persist after one retry. The caller (typically
/// the router's DLQ middleware) owns what happens to these events next.
#[derive(Debug)]
pub struct SurrenderedBatch {
    pub events: Vec<MediaEvent>,
    pub error: String,
}

struct Buffer {
    events: Vec<MediaEvent>,
}

/// `append` is safe for concurrent callers. `flush` is safe
/// sequential-only relative to a barrier after all producers stop — an
/// explicit `flush` racing live `append` calls from another task must be
/// externally ordered by the caller. The interval-driven flush loop is
/// internal and always safe.
pub struct BatchAppender {
    store: Arc<dyn Store>,
    config: AppenderConfig,
    buffer: Mutex<Buffer>,
    stats: Arc<Stats>,
    flush_now: Arc<Notify>,
}

impl BatchAppender {
    pub fn new(store: Arc<dyn Store>, config: AppenderConfig) -> Self {
        Self {
            store,
            config,
            buffer: Mutex::new(Buffer { events: Vec::new() }),
            stats: Arc::new(Stats::default()),
            flush_now: Arc::new(Notify::new()),
        }
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.lock().events.len()
    }

    /// Push an event onto the buffer. Triggers an immediate flush signal
    /// once the buffer reaches `batch_size`; the actual flush still runs
    /// through [`BatchAppender::flush`] on whichever task is driving the
    /// loop (see [`BatchAppender::run`]).
    pub fn append(&self, event: MediaEvent) {
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);
        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.events.push(event);
            buffer.events.len() >= self.config.batch_size
        };
        if should_flush {
            self.flush_now.notify_one();
        }
    }

    /// Drives the size-or-interval flush loop until `shutdown` is
    /// notified. Intended to run as its own task (see §5 concurrency
    /// model: one independent task per long-running component).
    pub async fn run(self: &Arc<Self>, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.flush_interval) => {
                    let _ = self.flush().await;
                }
                _ = self.flush_now.notified() => {
                    let _ = self.flush().await;
                }
                _ = shutdown.notified() => {
                    let _ = self.close().await;
                    return;
                }
            }
        }
    }

    /// Flush whatever is currently buffered. On failure, retries once
    /// synchronously; persistent failure increments `error_count`,
    /// surrenders the (drained) batch to the caller, and the in-memory
    /// buffer is empty either way.
    pub async fn flush(&self) -> Result<usize, SurrenderedBatch> {
        let events = {
            let mut buffer = self.buffer.lock();
            if buffer.events.is_empty() {
                return Ok(0);
            }
            std::mem::take(&mut buffer.events)
        };

        self.stats.flush_count.fetch_add(1, Ordering::Relaxed);
        let count = events.len();

        match self.store.insert_media_events(&events).await {
            Ok(()) => {
                self.stats.events_flushed.fetch_add(count as u64, Ordering::Relaxed);
                Ok(count)
            }
            Err(first_err) => {
                warn!("flush failed, retrying once: {first_err}");
                match self.store.insert_media_events(&events).await {
                    Ok(()) => {
                        self.stats.events_flushed.fetch_add(count as u64, Ordering::Relaxed);
                        Ok(count)
                    }
                    Err(second_err) => {
                        error!("flush failed after retry, surrendering batch: {second_err}");
                        self.stats.error_count.fetch_add(1, Ordering::Relaxed);
                        Err(SurrenderedBatch { events, error: second_err.to_string() })
                    }
                }
            }
        }
    }

    /// Final synchronous flush of any remaining events.
    pub async fn close(&self) -> Result<usize, SurrenderedBatch> {
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use model::{MediaType, Source};

    fn event(id: &str) -> MediaEvent {
        MediaEvent {
            event_id: id.to_string(),
            source: Source::Plex,
            user_id: 1,
            media_type: MediaType::Movie,
            title: id.to_string(),
            server_id: None,
            machine_id: None,
            rating_key: None,
            session_key: None,
            started_at: None,
            stopped_at: None,
            play_duration: None,
            transcode_decision: None,
            location_type: None,
            correlation_key: None,
        }
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl Store for FailingStore {
        async fn insert_media_events(&self, _events: &[MediaEvent]) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("store unavailable"))
        }
    }

    #[tokio::test]
    async fn flush_by_size_trigger() {
        let store = Arc::new(InMemoryStore::new());
        let appender =
            BatchAppender::new(store.clone(), AppenderConfig { batch_size: 3, flush_interval: Duration::from_secs(60) });

        for i in 0..3 {
            appender.append(event(&format!("e{i}")));
        }
        assert_eq!(appender.buffer_size(), 3);

        let flushed = appender.flush().await.unwrap();
        assert_eq!(flushed, 3);
        assert_eq!(store.len(), 3);
        assert_eq!(appender.stats().snapshot().events_flushed, 3);
    }

    #[tokio::test]
    async fn seed_s3_appender_sums_to_events_received() {
        let store = Arc::new(InMemoryStore::new());
        let appender = Arc::new(BatchAppender::new(
            store.clone(),
            AppenderConfig { batch_size: 1000, flush_interval: Duration::from_secs(60) },
        ));

        for i in 0..250 {
            appender.append(event(&format!("e{i}")));
        }
        appender.close().await.unwrap();

        let snapshot = appender.stats().snapshot();
        assert_eq!(snapshot.events_flushed, snapshot.events_received);
        assert_eq!(store.len(), 250);
    }

    #[tokio::test]
    async fn persistent_failure_surrenders_batch_and_drains_buffer() {
        let store = Arc::new(FailingStore);
        let appender =
            BatchAppender::new(store, AppenderConfig { batch_size: 10, flush_interval: Duration::from_secs(60) });

        appender.append(event("e1"));
        appender.append(event("e2"));

        let result = appender.flush().await;
        assert!(result.is_err());
        let surrendered = result.unwrap_err();
        assert_eq!(surrendered.events.len(), 2);
        assert_eq!(appender.buffer_size(), 0);
        assert_eq!(appender.stats().snapshot().error_count, 1);
    }

    #[tokio::test]
    async fn seed_s5_flush_by_interval() {
        let store = Arc::new(InMemoryStore::new());
        let appender = Arc::new(BatchAppender::new(
            store.clone(),
            AppenderConfig { batch_size: 1000, flush_interval: Duration::from_millis(50) },
        ));

        for i in 0..10 {
            appender.append(event(&format!("e{i}")));
        }

        let shutdown = Arc::new(Notify::new());
        let runner = appender.clone();
        let runner_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move { runner.run(runner_shutdown).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.notify_waiters();
        handle.await.unwrap();

        assert!(appender.stats().snapshot().flush_count >= 1);
        assert_eq!(store.len(), 10);
    }

    struct SlowStore {
        store: Arc<InMemoryStore>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Store for SlowStore {
        async fn insert_media_events(&self, events: &[MediaEvent]) -> Result<(), anyhow::Error> {
            tokio::time::sleep(self.delay).await;
            self.store.insert_media_events(events).await
        }
    }

    #[tokio::test]
    async fn seed_s6_backpressure_slow_store() {
        let inner = Arc::new(InMemoryStore::new());
        let store = Arc::new(SlowStore { store: inner.clone(), delay: Duration::from_millis(50) });
        let appender =
            BatchAppender::new(store, AppenderConfig { batch_size: 100, flush_interval: Duration::from_secs(60) });

        for i in 0..500 {
            appender.append(event(&format!("e{i}")));
        }

        let start = std::time::Instant::now();
        for _ in 0..5 {
            appender.flush().await.unwrap();
        }
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(5 * 50));
        assert_eq!(inner.len(), 500);
        assert_eq!(appender.stats().snapshot().error_count, 0);
    }

    #[tokio::test]
    async fn close_flushes_remaining_events() {
        let store = Arc::new(InMemoryStore::new());
        let appender =
            BatchAppender::new(store.clone(), AppenderConfig { batch_size: 1000, flush_interval: Duration::from_secs(60) });

        appender.append(event("e1"));
        appender.close().await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(appender.buffer_size(), 0);
    }
}
