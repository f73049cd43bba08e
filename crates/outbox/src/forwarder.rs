//! Forwarder (C12): polls the outbox repository for pending entries and
//! publishes them via the durable log's [`Publisher`], mirroring
//! `transactional-outbox::OutboxProcessor`'s poll/publish/mark loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventlog::Publisher;
use health::{ComponentHealth, HealthCheckable};
use tracing::{debug, error, info, warn};

use crate::error::OutboxResult;
use crate::message::OutboxMessage;
use crate::metrics::OutboxMetrics;
use crate::repository::OutboxRepository;

/// Oldest-pending age beyond which the forwarder reports degraded, even
/// though it is still making progress.
const STALE_AFTER_SECS: i64 = 300;
/// Oldest-pending age beyond which the forwarder reports unhealthy —
/// forwarding has effectively stalled.
const UNHEALTHY_AFTER_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub poll_interval: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self { batch_size: 100, max_retries: 5, poll_interval: Duration::from_millis(100) }
    }
}

pub struct Forwarder {
    repository: Arc<dyn OutboxRepository>,
    publisher: Arc<Publisher>,
    config: ForwarderConfig,
    metrics: Option<OutboxMetrics>,
}

impl Forwarder {
    pub fn new(repository: Arc<dyn OutboxRepository>, publisher: Arc<Publisher>, config: ForwarderConfig) -> Self {
        Self { repository, publisher, config, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&OutboxMetrics> {
        self.metrics.as_ref()
    }

    /// Runs until `shutdown` is notified, polling at `poll_interval`.
    pub async fn run(&self, shutdown: Arc<tokio::sync::Notify>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.forward_batch().await {
                        error!("outbox forward batch failed: {e}");
                    }
                    self.record_metrics().await;
                }
                _ = shutdown.notified() => return,
            }
        }
    }

    /// Publish one batch of pending entries. Returns the number delivered.
    pub async fn forward_batch(&self) -> OutboxResult<usize> {
        let entries = self.repository.get_pending(self.config.batch_size).await?;
        let mut delivered = 0;

        for entry in entries {
            if entry.retry_count >= self.config.max_retries {
                warn!(id = %entry.id, retries = entry.retry_count, "outbox entry exceeded max_retries, leaving for operator");
                continue;
            }

            match self.publish_entry(&entry).await {
                Ok(()) => {
                    self.repository.mark_delivered(&entry.id).await?;
                    delivered += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.published.inc();
                    }
                }
                Err(e) => {
                    warn!(id = %entry.id, "outbox publish failed: {e}");
                    self.repository.mark_failed(&entry.id, &e.to_string()).await?;
                }
            }
        }

        if delivered > 0 {
            debug!(delivered, "outbox batch forwarded");
        }
        Ok(delivered)
    }

    async fn publish_entry(&self, entry: &OutboxMessage) -> Result<(), anyhow::Error> {
        let mut headers = std::collections::HashMap::new();
        headers.insert("X-Outbox-Id".to_string(), entry.id.clone());
        self.publisher.publish_raw(&entry.topic, entry.payload.clone(), headers).await?;
        Ok(())
    }

    async fn record_metrics(&self) {
        let Some(metrics) = &self.metrics else { return };
        if let Ok((pending, age)) = self.repository.pending_stats().await {
            metrics.pending.set(pending as i64);
            metrics.oldest_pending_age_seconds.set(age);
        }
    }
}

#[async_trait]
impl HealthCheckable for Forwarder {
    async fn check_health(&self) -> ComponentHealth {
        match self.repository.pending_stats().await {
            Ok((_, age)) if age >= UNHEALTHY_AFTER_SECS => {
                ComponentHealth::unhealthy(format!("oldest pending entry is {age}s old"))
            }
            Ok((pending, age)) if age >= STALE_AFTER_SECS => {
                ComponentHealth::degraded(format!("{pending} pending, oldest {age}s old"))
            }
            Ok(_) => ComponentHealth::healthy("forwarder keeping up"),
            Err(e) => ComponentHealth::unhealthy(format!("pending_stats failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryOutboxRepository;
    use eventlog::{FakeBroker, StreamConfig};

    async fn publisher() -> Arc<Publisher> {
        let broker = Arc::new(FakeBroker::new());
        let mut stream = StreamConfig::default();
        stream.subjects.push("dlq.>".to_string());
        broker.ensure_stream(&stream).await.unwrap();
        Arc::new(Publisher::new(broker))
    }

    #[tokio::test]
    async fn forward_batch_delivers_pending_entries() {
        let repo = Arc::new(InMemoryOutboxRepository::new());
        repo.store(OutboxMessage::new("m1", "dlq.playback.malformed", b"boom".to_vec())).await.unwrap();

        let forwarder = Forwarder::new(repo.clone(), publisher().await, ForwarderConfig::default());
        let delivered = forwarder.forward_batch().await.unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(repo.get_pending(10).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn entries_past_max_retries_are_left_pending() {
        let repo = Arc::new(InMemoryOutboxRepository::new());
        let mut message = OutboxMessage::new("m1", "dlq.playback.malformed", vec![]);
        message.retry_count = 5;
        repo.store(message).await.unwrap();

        let forwarder = Forwarder::new(
            repo.clone(),
            publisher().await,
            ForwarderConfig { max_retries: 5, ..Default::default() },
        );
        let delivered = forwarder.forward_batch().await.unwrap();

        assert_eq!(delivered, 0);
        assert_eq!(repo.get_pending(10).await.unwrap().len(), 1);
    }
}
