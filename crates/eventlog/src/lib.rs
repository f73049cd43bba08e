//! Durable event log: stream lifecycle (C3), publisher (C4) and subscriber
//! (C5), wrapping `async-nats` JetStream behind a [`Broker`] trait so
//! every other crate in the workspace, and its own tests, depend on the
//! trait rather than a live NATS server.

pub mod broker;
pub mod error;
pub mod fake_broker;
pub mod nats_broker;
pub mod publisher;
pub mod stream;
pub mod subscriber;

pub use broker::{
    AckHandle, AckPolicy, Broker, DeliverPolicy, IncomingMessage, MessageStream, QueryOptions,
    SubscribeConfig,
};
pub use error::EventLogError;
pub use fake_broker::FakeBroker;
pub use nats_broker::NatsBroker;
pub use publisher::Publisher;
pub use stream::{RetentionPolicy, StorageType, StreamConfig, StreamMessage};
pub use subscriber::Subscriber;
