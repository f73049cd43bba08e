//! Durable, queue-group bound subscriber (C5). Thin wrapper around
//! [`Broker::subscribe`] that enforces the wildcard-binding rule and hands
//! back a lazy message stream terminated by broker close or the caller
//! dropping it.

use std::sync::Arc;

use crate::broker::{Broker, MessageStream, SubscribeConfig};
use crate::error::EventLogError;

pub struct Subscriber {
    broker: Arc<dyn Broker>,
}

impl Subscriber {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Bind a durable consumer and yield its message stream. Each item
    /// carries an explicit ack/nack handle — there is no implicit
    /// timeout-ack.
    pub async fn subscribe(&self, config: SubscribeConfig) -> Result<MessageStream, EventLogError> {
        self.broker.subscribe(config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::DeliverPolicy;
    use crate::fake_broker::FakeBroker;
    use crate::stream::StreamConfig;
    use futures::StreamExt;

    #[tokio::test]
    async fn subscribe_yields_published_messages_in_order() {
        let broker = Arc::new(FakeBroker::new());
        broker.ensure_stream(&StreamConfig::default()).await.unwrap();

        let subscriber = Subscriber::new(broker.clone());
        let mut stream = subscriber
            .subscribe(SubscribeConfig { deliver_policy: DeliverPolicy::New, ..Default::default() })
            .await
            .unwrap();

        broker.publish("playback.plex.movie", b"1".to_vec(), Default::default()).await.unwrap();
        broker.publish("playback.plex.movie", b"2".to_vec(), Default::default()).await.unwrap();

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.message.payload, b"1");
        assert_eq!(second.message.payload, b"2");
    }

    #[tokio::test]
    async fn subscribe_on_missing_stream_fails() {
        let broker = Arc::new(FakeBroker::new());
        let subscriber = Subscriber::new(broker);
        let result = subscriber.subscribe(SubscribeConfig::default()).await;
        assert!(result.is_err());
    }
}
