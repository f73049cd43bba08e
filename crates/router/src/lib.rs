//! Message router (C8): the middleware chain that sits between a
//! subscription and a typed [`Handler`] — correlation-id propagation,
//! panic recovery, cross-source dedup, circuit breaking, retry and DLQ.

pub mod dedup;
pub mod dlq;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod router;

pub use dedup::{DedupConfig, Deduplicator};
pub use dlq::{DlqConfig, DlqEntry, DlqHandler, DlqStats};
pub use error::RouterError;
pub use handler::{FnHandler, Handler, MessageContext};
pub use metrics::RouterMetrics;
pub use router::{Outcome, Router, RouterConfig};
