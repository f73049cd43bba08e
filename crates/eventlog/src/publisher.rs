//! Durable publisher (C4): validates and marshals a [`MediaEvent`],
//! attaches the `Nats-Msg-Id` header for broker-side dedup, and submits it
//! through an optional circuit breaker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use health::{ComponentHealth, HealthCheckable};
use model::MediaEvent;
use resilience::{CircuitBreaker, CircuitBreakerError, CircuitState};

use crate::broker::Broker;
use crate::error::EventLogError;

/// Wraps a [`Broker`] with breaker protection. Safe for concurrent use —
/// every method takes `&self` and the broker itself must be `Send + Sync`.
pub struct Publisher {
    broker: Arc<dyn Broker>,
    breaker: Option<CircuitBreaker>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker, breaker: None }
    }

    pub fn with_breaker(broker: Arc<dyn Broker>, breaker: CircuitBreaker) -> Self {
        Self { broker, breaker: Some(breaker) }
    }

    /// Validate, marshal, attach `message_id` and publish. Returns the
    /// sequence number assigned by the stream.
    pub async fn publish(&self, event: &MediaEvent) -> Result<u64, EventLogError> {
        let topic = event.topic();
        let payload = event.marshal()?;

        let mut headers = HashMap::new();
        headers.insert("Nats-Msg-Id".to_string(), event.event_id.clone());

        self.submit(&topic, payload, headers).await
    }

    /// Publish a set of events. Atomic only per-message: either all are
    /// attempted (earlier failures don't block later ones), and the
    /// caller sees each individual outcome.
    pub async fn publish_batch(&self, events: &[MediaEvent]) -> Vec<Result<u64, EventLogError>> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            results.push(self.publish(event).await);
        }
        results
    }

    /// Publish an arbitrary payload to `subject`, bypassing `MediaEvent`
    /// validation and the `Nats-Msg-Id` header convention. Used for DLQ
    /// quarantine, where the payload may be malformed or not a
    /// `MediaEvent` at all.
    pub async fn publish_raw(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<u64, EventLogError> {
        self.submit(subject, payload, headers).await
    }

    async fn submit(
        &self,
        topic: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<u64, EventLogError> {
        match &self.breaker {
            None => self.broker.publish(topic, payload, headers).await,
            Some(breaker) => {
                let broker = Arc::clone(&self.broker);
                let topic = topic.to_string();
                breaker
                    .call(|| async move { broker.publish(&topic, payload, headers).await })
                    .await
                    .map_err(|e| match e {
                        CircuitBreakerError::Open => EventLogError::BreakerOpen,
                        CircuitBreakerError::CallFailed(msg) => EventLogError::Publish(msg),
                    })
            }
        }
    }
}

#[async_trait]
impl HealthCheckable for Publisher {
    async fn check_health(&self) -> ComponentHealth {
        match self.breaker.as_ref().map(|b| b.state()) {
            Some(CircuitState::Open) => ComponentHealth::unhealthy("publish breaker open"),
            Some(CircuitState::HalfOpen) => ComponentHealth::degraded("publish breaker half-open, probing"),
            Some(CircuitState::Closed) | None => ComponentHealth::healthy("publisher accepting writes"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_broker::FakeBroker;
    use crate::stream::StreamConfig;
    use resilience::CircuitBreakerConfig;
    use std::time::Duration;

    fn event() -> MediaEvent {
        MediaEvent {
            event_id: "e1".to_string(),
            source: model::Source::Plex,
            user_id: 1,
            media_type: model::MediaType::Movie,
            title: "M".to_string(),
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
    async fn publish_attaches_message_id_header() {
        let broker = Arc::new(FakeBroker::new());
        broker.ensure_stream(&StreamConfig::default()).await.unwrap();
        let publisher = Publisher::new(broker.clone());

        let seq = publisher.publish(&event()).await.unwrap();
        assert_eq!(seq, 1);

        let stored = broker.get_message("MEDIA_EVENTS", 1).await.unwrap();
        assert_eq!(stored.header("Nats-Msg-Id"), Some("e1"));
    }

    #[tokio::test]
    async fn publish_rejects_invalid_event_before_touching_broker() {
        let broker = Arc::new(FakeBroker::new());
        broker.ensure_stream(&StreamConfig::default()).await.unwrap();
        let publisher = Publisher::new(broker.clone());

        let mut bad = event();
        bad.title.clear();
        let result = publisher.publish(&bad).await;
        assert!(result.is_err());
        assert_eq!(broker.get_last_sequence("MEDIA_EVENTS").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn breaker_open_rejects_without_contacting_broker() {
        let broker = Arc::new(FakeBroker::new());
        broker.ensure_stream(&StreamConfig::default()).await.unwrap();

        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_secs(60),
            ..Default::default()
        });
        // Force the breaker open independent of the broker.
        let _ = breaker.call(|| async { Err::<(), _>("seed failure") }).await;

        let publisher = Publisher::with_breaker(broker.clone(), breaker);
        let result = publisher.publish(&event()).await;
        assert!(matches!(result, Err(EventLogError::BreakerOpen)));
        assert_eq!(broker.get_last_sequence("MEDIA_EVENTS").await.unwrap(), 0);
    }
}
