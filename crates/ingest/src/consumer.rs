//! DuckDB consumer (C9): bridges a subscriber to the batch appender.
//! Unmarshal, stamp the correlation key, hand to the appender — the
//! direct structural analogue of a Kafka-to-columnar-store bridge, just
//! against a JetStream subscriber instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eventlog::{MessageStream, SubscribeConfig, Subscriber};
use futures::StreamExt;
use health::{ComponentHealth, HealthCheckable};
use model::MediaEvent;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::appender::BatchAppender;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub subscribe: SubscribeConfig,
    /// Number of tasks pulling from the shared message stream. With
    /// `worker_count > 1`, events from the same session may be observed
    /// out of order downstream; accepted because events are timestamped
    /// at source and the store upserts on `correlation_key`. Use 1 where
    /// strict insert ordering matters.
    pub worker_count: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self { subscribe: SubscribeConfig::default(), worker_count: 1 }
    }
}

struct ConsumerState {
    started: AtomicBool,
    stopped: AtomicBool,
    subscriber_ok: AtomicBool,
}

pub struct DuckDbConsumer {
    subscriber: Arc<Subscriber>,
    appender: Arc<BatchAppender>,
    config: ConsumerConfig,
    state: Arc<ConsumerState>,
    shutdown: Arc<Notify>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl DuckDbConsumer {
    pub fn new(subscriber: Arc<Subscriber>, appender: Arc<BatchAppender>, config: ConsumerConfig) -> Self {
        Self {
            subscriber,
            appender,
            config,
            state: Arc::new(ConsumerState {
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                subscriber_ok: AtomicBool::new(false),
            }),
            shutdown: Arc::new(Notify::new()),
            workers: AsyncMutex::new(Vec::new()),
        }
    }

    /// Acquire the subscription, launch `worker_count` worker tasks
    /// sharing it, and return once they're running.
    pub async fn start(self: &Arc<Self>) -> Result<(), eventlog::EventLogError> {
        let stream = self.subscriber.subscribe(self.config.subscribe.clone()).await?;
        self.state.subscriber_ok.store(true, Ordering::Relaxed);
        self.state.started.store(true, Ordering::Relaxed);

        let shared_stream: Arc<AsyncMutex<MessageStream>> = Arc::new(AsyncMutex::new(stream));
        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.config.worker_count.max(1) {
            let appender = self.appender.clone();
            let state = self.state.clone();
            let shutdown = self.shutdown.clone();
            let shared_stream = shared_stream.clone();

            let handle = tokio::spawn(async move {
                loop {
                    let next = {
                        let mut stream = shared_stream.lock().await;
                        tokio::select! {
                            item = stream.next() => item,
                            _ = shutdown.notified() => None,
                        }
                    };

                    let Some(incoming) = next else {
                        break;
                    };

                    match MediaEvent::unmarshal(&incoming.message.payload) {
                        Ok(mut event) => {
                            event.set_correlation_key();
                            appender.append(event);
                            if let Err(e) = incoming.handle.ack().await {
                                warn!(worker_id, "ack failed: {e}");
                            }
                        }
                        Err(e) => {
                            error!(worker_id, "unmarshal failed, nacking: {e}");
                            if let Err(nack_err) = incoming.handle.nack().await {
                                warn!(worker_id, "nack failed: {nack_err}");
                            }
                        }
                    }
                }
                info!(worker_id, "consumer worker exiting");
            });
            workers.push(handle);
        }

        Ok(())
    }

    /// Cancel in-flight work, drain workers, close the subscriber, and run
    /// a final appender flush.
    pub async fn stop(&self) {
        self.shutdown.notify_waiters();
        self.state.stopped.store(true, Ordering::Relaxed);

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }

        let _ = self.appender.close().await;
        self.state.subscriber_ok.store(false, Ordering::Relaxed);
    }

    pub fn healthy(&self) -> bool {
        self.state.started.load(Ordering::Relaxed)
            && !self.state.stopped.load(Ordering::Relaxed)
            && self.state.subscriber_ok.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HealthCheckable for DuckDbConsumer {
    async fn check_health(&self) -> ComponentHealth {
        if self.healthy() {
            ComponentHealth::healthy("consumer running, subscriber ok")
        } else if self.state.stopped.load(Ordering::Relaxed) {
            ComponentHealth::unhealthy("consumer stopped")
        } else {
            ComponentHealth::unhealthy("consumer not started or subscriber not ok")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appender::AppenderConfig;
    use crate::store::InMemoryStore;
    use eventlog::{DeliverPolicy, FakeBroker, StreamConfig};
    use model::{MediaType, Source};
    use std::time::Duration;

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

    #[tokio::test]
    async fn consumer_unmarshals_stamps_key_and_appends() {
        let broker = Arc::new(FakeBroker::new());
        broker.ensure_stream(&StreamConfig::default()).await.unwrap();

        let subscriber = Arc::new(Subscriber::new(broker.clone()));
        let store = Arc::new(InMemoryStore::new());
        let appender = Arc::new(BatchAppender::new(
            store.clone(),
            AppenderConfig { batch_size: 1, flush_interval: Duration::from_millis(20) },
        ));

        let consumer = Arc::new(DuckDbConsumer::new(
            subscriber,
            appender.clone(),
            ConsumerConfig {
                subscribe: SubscribeConfig { deliver_policy: DeliverPolicy::New, ..Default::default() },
                worker_count: 1,
            },
        ));
        consumer.start().await.unwrap();
        assert!(consumer.healthy());

        use eventlog::Broker as _;
        let payload = event("e1").marshal().unwrap();
        let mut headers = std::collections::HashMap::new();
        headers.insert("Nats-Msg-Id".to_string(), "e1".to_string());
        broker.publish("playback.plex.movie", payload, headers).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        consumer.stop().await;

        assert_eq!(store.len(), 1);
        let stored = &store.snapshot()[0];
        assert!(stored.correlation_key.is_some());
    }
}
