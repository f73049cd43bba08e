//! Appender metrics, exported the way `outbox::metrics::OutboxMetrics`
//! exports the forwarder's: `prometheus` gauges registered once against
//! `prometheus::default_registry()`, labelled by pipeline name so more
//! than one appender in a process doesn't collide on metric identity.

use once_cell::sync::OnceCell;
use prometheus::{IntGauge, Opts};
use tracing::warn;

use crate::appender::StatsSnapshot;

#[derive(Clone)]
pub struct AppenderMetrics {
    pub events_received: IntGauge,
    pub events_flushed: IntGauge,
    pub flush_count: IntGauge,
    pub error_count: IntGauge,
    pub buffer_size: IntGauge,
}

impl AppenderMetrics {
    pub fn new(pipeline: &str) -> Self {
        let registry = prometheus::default_registry();

        let gauge = |name: &str, help: &str| -> IntGauge {
            let gauge = IntGauge::with_opts(Opts::new(name, help).const_label("pipeline", pipeline.to_string()))
                .unwrap_or_else(|_| panic!("valid metric opts for {name}"));
            if let Err(e) = registry.register(Box::new(gauge.clone())) {
                warn!("failed to register appender metric {name}: {e}");
            }
            gauge
        };

        Self {
            events_received: gauge("appender_events_received", "Total events appended to the batch buffer"),
            events_flushed: gauge("appender_events_flushed", "Total events successfully flushed to the store"),
            flush_count: gauge("appender_flush_count", "Total flush operations attempted"),
            error_count: gauge("appender_error_count", "Total flushes that failed after one retry"),
            buffer_size: gauge("appender_buffer_size", "Current number of buffered, unflushed events"),
        }
    }

    pub fn update(&self, stats: StatsSnapshot, buffer_size: usize) {
        self.events_received.set(stats.events_received as i64);
        self.events_flushed.set(stats.events_flushed as i64);
        self.flush_count.set(stats.flush_count as i64);
        self.error_count.set(stats.error_count as i64);
        self.buffer_size.set(buffer_size as i64);
    }
}

static GLOBAL: OnceCell<AppenderMetrics> = OnceCell::new();

/// Process-wide appender metrics handle, created on first use.
pub fn global(pipeline: &str) -> &'static AppenderMetrics {
    GLOBAL.get_or_init(|| AppenderMetrics::new(pipeline))
}
