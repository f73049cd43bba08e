//! Wires the nine workspace crates into one running pipeline: subscriber
//! -> router (dedup/breaker/retry/DLQ) -> appender handler -> batch
//! appender, plus the resilient reader, health registry, and outbox
//! forwarder running alongside it.
//!
//! The hot `MediaEvent` path never touches the outbox — that buffer is
//! reserved for DLQ-quarantine and stream-health notices that must
//! survive a broker outage, published by `run_stream_health_task`.

use std::sync::Arc;

use eventlog::{Broker, FakeBroker, NatsBroker, Publisher, Subscriber};
use health::{HealthRegistry, OverallStatus, RegistryConfig};
use ingest::{BatchAppender, InMemoryStore, Store};
use outbox::{Forwarder, ForwarderConfig, InMemoryOutboxRepository, OutboxMessage, OutboxMetrics, OutboxRepository};
use reader::{ReaderConfig, ResilientReader};
use resilience::{CircuitBreaker, CircuitBreakerConfig};
use router::{Router, RouterConfig};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::MediabusError;
use crate::handler::AppenderHandler;

/// Every long-running component of the pipeline, bootstrapped once and
/// driven by `Pipeline::run` until shutdown.
pub struct Pipeline {
    pub config: Config,
    pub publisher: Arc<Publisher>,
    pub subscriber: Arc<Subscriber>,
    pub router: Arc<Router>,
    pub appender: Arc<BatchAppender>,
    pub store: Arc<dyn Store>,
    pub reader: Arc<ResilientReader>,
    pub health: Arc<HealthRegistry>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub forwarder: Arc<Forwarder>,
    pub shutdown: Arc<Notify>,
}

impl Pipeline {
    pub async fn bootstrap(config: Config) -> Result<Arc<Self>, MediabusError> {
        let broker: Arc<dyn Broker> = if config.nats_enabled {
            Arc::new(NatsBroker::connect(&config.nats_url).await?)
        } else {
            Arc::new(FakeBroker::new())
        };
        broker.ensure_stream(&config.stream_config()).await?;

        let publish_breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let publisher = Arc::new(Publisher::with_breaker(broker.clone(), publish_breaker));

        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let appender = Arc::new(BatchAppender::new(store.clone(), config.appender_config()));

        let handler = Arc::new(AppenderHandler::new(appender.clone()));
        let router = Arc::new(Router::new(handler, publisher.clone(), RouterConfig::default()));

        let subscriber = Arc::new(Subscriber::new(broker.clone()));

        // Second connection against the same stream: a believable
        // alternate query path, not a second cluster. In dev/test mode
        // (FakeBroker) there is no redundancy to buy, so both paths share
        // the one in-memory broker.
        let fallback: Arc<dyn Broker> = if config.nats_enabled {
            Arc::new(NatsBroker::connect(&config.nats_url).await?)
        } else {
            broker.clone()
        };
        let reader = Arc::new(ResilientReader::new(
            broker.clone(),
            fallback,
            CircuitBreaker::new(CircuitBreakerConfig::default()),
            ReaderConfig { stream: "MEDIA_EVENTS".to_string(), ..ReaderConfig::default() },
        ));

        let outbox: Arc<dyn OutboxRepository> = Arc::new(InMemoryOutboxRepository::new());
        let forwarder = Arc::new(
            Forwarder::new(outbox.clone(), publisher.clone(), ForwarderConfig::default())
                .with_metrics(OutboxMetrics::new("mediabus")),
        );

        let health = Arc::new(HealthRegistry::new(RegistryConfig::default()));
        health.register("publisher", publisher.clone());
        health.register("router", router.clone());
        health.register("reader", reader.clone());
        health.register("forwarder", forwarder.clone());

        Ok(Arc::new(Self {
            config,
            publisher,
            subscriber,
            router,
            appender,
            store,
            reader,
            health,
            outbox,
            forwarder,
            shutdown: Arc::new(Notify::new()),
        }))
    }

    /// Spawns one task per long-running component — appender flush loop,
    /// router dispatch loop, reader health probe, outbox forwarder — and
    /// a stream-health notifier watching the aggregate report. Returns
    /// once every task has been spawned; they run until `self.shutdown`
    /// fires.
    pub async fn run(self: &Arc<Self>) -> Result<(), MediabusError> {
        let appender = self.appender.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { appender.run(shutdown).await });

        let stream = self.subscriber.subscribe(self.config.consumer_config().subscribe).await?;
        let router = self.router.clone();
        tokio::spawn(async move { router.run(stream).await });

        let reader = self.reader.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { reader.run_health_probe(shutdown).await });

        let forwarder = self.forwarder.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { forwarder.run(shutdown).await });

        let health = self.health.clone();
        let outbox = self.outbox.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { run_stream_health_task(health, outbox, shutdown).await });

        let appender = self.appender.clone();
        let router = self.router.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { run_metrics_task(appender, router, shutdown).await });

        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
        let _ = self.appender.close().await;
    }
}

/// Watches the health rollup and, whenever it degrades or recovers,
/// buffers a notice in the outbox so it survives a broker outage instead
/// of being dropped on a direct publish attempt.
async fn run_stream_health_task(health: Arc<HealthRegistry>, outbox: Arc<dyn OutboxRepository>, shutdown: Arc<Notify>) {
    let mut last_status = None;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(30)) => {
                let report = health.check_all().await;
                if last_status != Some(report.status) {
                    info!(status = ?report.status, "pipeline health transition");
                    if report.status != OverallStatus::Healthy {
                        let payload = match serde_json::to_vec(&report) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!("failed to encode health report: {e}");
                                continue;
                            }
                        };
                        let message = OutboxMessage::new(uuid::Uuid::new_v4().to_string(), "system.health.mediabus", payload);
                        if let Err(e) = outbox.store(message).await {
                            warn!("failed to buffer stream-health notice: {e}");
                        }
                    }
                    last_status = Some(report.status);
                }
            }
            _ = shutdown.notified() => return,
        }
    }
}

/// Polls the appender and router's counters on an interval and copies them
/// into the process-wide `prometheus` gauges — neither component updates
/// its metrics inline on the hot path.
async fn run_metrics_task(appender: Arc<BatchAppender>, router: Arc<Router>, shutdown: Arc<Notify>) {
    let appender_metrics = ingest::metrics::global("mediabus");
    let router_metrics = router::metrics::global("mediabus");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
                appender_metrics.update(appender.stats().snapshot(), appender.buffer_size());
                router_metrics.update(router.dlq_handler().stats(), router.breaker_state());
            }
            _ = shutdown.notified() => return,
        }
    }
}
