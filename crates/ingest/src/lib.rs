//! Batch appender (C6) and DuckDB consumer (C9): the path from a
//! subscribed message stream into the columnar store.

pub mod appender;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod store;

pub use appender::{AppenderConfig, BatchAppender, Stats, StatsSnapshot, SurrenderedBatch};
pub use consumer::{ConsumerConfig, DuckDbConsumer};
pub use error::IngestError;
pub use metrics::AppenderMetrics;
pub use store::{InMemoryStore, Store};
