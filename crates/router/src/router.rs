//! Router & handlers (C8): the middleware pipeline wrapping each
//! subscribed topic — correlation-id, recovery, dedup, breaker, retry,
//! DLQ, in that order — dispatching to a typed [`Handler`].
//!
//! State machine per message: `received -> dedup_check ->
//! {duplicate? -> acked} -> dispatch -> {ok -> acked | retryable ->
//! redelivered | permanent -> dlq}`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use eventlog::{IncomingMessage, MessageStream, Publisher};
use futures::{FutureExt, StreamExt};
use health::{ComponentHealth, HealthCheckable};
use model::MediaEvent;
use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, ErrorCategory, HandlerError, PermanentError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dedup::{DedupConfig, Deduplicator};
use crate::dlq::{DlqConfig, DlqHandler};
use crate::error::RouterError;
use crate::handler::{Handler, MessageContext};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub dedup: DedupConfig,
    pub breaker: CircuitBreakerConfig,
    pub dlq: DlqConfig,
    /// Subject quarantined messages are published to.
    pub poison_topic: String,
    /// Upper bound on redelivery attempts before a retryable error is
    /// routed to the DLQ.
    pub max_deliver: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            dedup: DedupConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            dlq: DlqConfig::default(),
            poison_topic: "dlq.playback".to_string(),
            max_deliver: 5,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    #[default]
    Dispatched,
    Duplicate,
    Redelivered,
    DeadLettered,
    BreakerOpen,
}

pub struct Router {
    handler: Arc<dyn Handler>,
    publisher: Arc<Publisher>,
    dedup: Deduplicator,
    breaker: CircuitBreaker,
    dlq: DlqHandler,
    config: RouterConfig,
}

impl Router {
    pub fn new(handler: Arc<dyn Handler>, publisher: Arc<Publisher>, config: RouterConfig) -> Self {
        Self {
            handler,
            publisher,
            dedup: Deduplicator::new(config.dedup.clone()),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            dlq: DlqHandler::new(config.dlq.clone()),
            config,
        }
    }

    pub fn dlq_handler(&self) -> &DlqHandler {
        &self.dlq
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Drains `stream`, dispatching each message through the full
    /// pipeline in arrival order. Ordering across queue-group peers
    /// pulling from the same durable consumer is not preserved; within
    /// this one worker it is.
    pub async fn run(&self, mut stream: MessageStream) {
        while let Some(incoming) = stream.next().await {
            let outcome = self.dispatch(incoming).await;
            if let Err(e) = outcome {
                error!("router dispatch error: {e}");
            }
        }
    }

    pub async fn dispatch(&self, incoming: IncomingMessage) -> Result<Outcome, RouterError> {
        // 1. Correlation-id middleware: propagate if present, else assign.
        let correlation_id = incoming
            .message
            .header("X-Correlation-Id")
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let topic = incoming.message.subject.clone();

        // Unmarshal up front: every later stage operates on a typed
        // event. A malformed payload is a permanent error, straight to
        // DLQ, never retried.
        let event = match MediaEvent::unmarshal(&incoming.message.payload) {
            Ok(mut event) => {
                event.set_correlation_key();
                event
            }
            Err(e) => {
                warn!(correlation_id, "malformed payload, routing to dlq: {e}");
                self.quarantine_raw(&incoming.message.payload, &topic, &e.to_string()).await?;
                incoming.handle.ack().await?;
                return Ok(Outcome::DeadLettered);
            }
        };

        let ctx = MessageContext { correlation_id: correlation_id.clone(), topic: topic.clone(), attempt: 0 };

        // 3. Dedup middleware.
        let cross_source_key = event.cross_source_key();
        if !self.dedup.check_and_mark(&cross_source_key) {
            info!(correlation_id, cross_source_key, "duplicate, acking without dispatch");
            incoming.handle.ack().await?;
            return Ok(Outcome::Duplicate);
        }

        // 4. Circuit-breaker middleware: skip handler, nack for retry.
        if !self.breaker.try_admit() {
            warn!(correlation_id, "breaker open, nacking for redelivery");
            incoming.handle.nack().await?;
            return Ok(Outcome::BreakerOpen);
        }

        // 2. Recovery middleware wraps the actual dispatch: panics become
        // permanent errors rather than crashing the worker.
        let event_id = event.event_id.clone();
        let dispatch_result = AssertUnwindSafe(self.handler.handle(event.clone(), &ctx)).catch_unwind().await;

        let handler_result = match dispatch_result {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                Err(HandlerError::Permanent(PermanentError::new(anyhow::anyhow!("handler panicked: {message}"))))
            }
        };

        match handler_result {
            Ok(()) => {
                self.breaker.record_success();
                self.dlq.remove_entry(&event_id);
                incoming.handle.ack().await?;
                Ok(Outcome::Dispatched)
            }
            Err(err) => self.handle_failure(incoming, event, err, &correlation_id).await,
        }
    }

    async fn handle_failure(
        &self,
        incoming: IncomingMessage,
        event: MediaEvent,
        err: HandlerError,
        correlation_id: &str,
    ) -> Result<Outcome, RouterError> {
        self.breaker.record_failure();

        let category = err.category();
        let event_id = event.event_id.clone();
        self.dlq.add_entry(event.clone(), err.to_string(), category);

        // 5. Retry middleware: retryable errors are redelivered up to
        // max_deliver; anything else (including exhausted retries) falls
        // through to DLQ.
        let attempt = self.dlq.increment_retry(&event_id).unwrap_or(1);
        if matches!(category, ErrorCategory::Transient | ErrorCategory::Unknown) && attempt < self.config.max_deliver
        {
            warn!(correlation_id, attempt, "retryable error, nacking for redelivery: {err}");
            incoming.handle.nack().await?;
            return Ok(Outcome::Redelivered);
        }

        // 6. DLQ middleware: permanent error or exhausted retries.
        warn!(correlation_id, attempt, "routing to dlq: {err}");
        self.quarantine(&event, &err.to_string()).await?;
        self.dlq.remove_entry(&event_id);
        incoming.handle.ack().await?;
        Ok(Outcome::DeadLettered)
    }

    async fn quarantine(&self, event: &MediaEvent, error: &str) -> Result<(), RouterError> {
        let mut headers = HashMap::new();
        headers.insert("X-Dlq-Reason".to_string(), error.to_string());
        let payload = serde_json::to_vec(event).map_err(|e| RouterError::DlqPublish(e.to_string()))?;
        self.publisher
            .publish_raw(&format!("{}.{}", self.config.poison_topic, event.source), payload, headers)
            .await
            .map_err(RouterError::from)?;
        Ok(())
    }

    async fn quarantine_raw(&self, payload: &[u8], original_topic: &str, error: &str) -> Result<(), RouterError> {
        let mut headers = HashMap::new();
        headers.insert("X-Dlq-Reason".to_string(), error.to_string());
        headers.insert("X-Original-Topic".to_string(), original_topic.to_string());
        self.publisher
            .publish_raw(&format!("{}.malformed", self.config.poison_topic), payload.to_vec(), headers)
            .await
            .map_err(RouterError::from)?;
        Ok(())
    }
}

#[async_trait]
impl HealthCheckable for Router {
    async fn check_health(&self) -> ComponentHealth {
        let depth = self.dlq.stats().total_entries;
        match self.breaker_state() {
            CircuitState::Open => ComponentHealth::unhealthy("dispatch breaker open"),
            CircuitState::HalfOpen => ComponentHealth::degraded("dispatch breaker half-open, probing"),
            CircuitState::Closed if depth > self.config.dlq.max_entries / 2 => {
                ComponentHealth::degraded(format!("dlq filling up: {depth} entries"))
            }
            CircuitState::Closed => ComponentHealth::healthy("router dispatching"),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
