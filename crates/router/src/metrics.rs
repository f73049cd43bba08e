//! Router metrics, following the same registration pattern as
//! `ingest::metrics::AppenderMetrics`: `prometheus` gauges registered once
//! against `prometheus::default_registry()`, read by an external poller
//! rather than updated inline on the hot dispatch path.

use once_cell::sync::OnceCell;
use prometheus::{IntCounter, IntGauge, Opts};
use resilience::CircuitState;
use tracing::warn;

use crate::dlq::DlqStats;

#[derive(Clone)]
pub struct RouterMetrics {
    pub dlq_depth: IntGauge,
    pub dlq_dropped_total: IntCounter,
    pub breaker_open: IntGauge,
}

impl RouterMetrics {
    pub fn new(pipeline: &str) -> Self {
        let registry = prometheus::default_registry();

        let gauge = |name: &str, help: &str| -> IntGauge {
            let gauge = IntGauge::with_opts(Opts::new(name, help).const_label("pipeline", pipeline.to_string()))
                .unwrap_or_else(|_| panic!("valid metric opts for {name}"));
            if let Err(e) = registry.register(Box::new(gauge.clone())) {
                warn!("failed to register router metric {name}: {e}");
            }
            gauge
        };

        let counter = IntCounter::with_opts(
            Opts::new("router_dlq_dropped_total", "Total DLQ entries evicted for capacity")
                .const_label("pipeline", pipeline.to_string()),
        )
        .unwrap_or_else(|_| panic!("valid metric opts for router_dlq_dropped_total"));
        if let Err(e) = registry.register(Box::new(counter.clone())) {
            warn!("failed to register router metric router_dlq_dropped_total: {e}");
        }

        Self {
            dlq_depth: gauge("router_dlq_depth", "Current number of entries held in the DLQ"),
            dlq_dropped_total: counter,
            breaker_open: gauge("router_breaker_open", "1 if the dispatch breaker is open, else 0"),
        }
    }

    pub fn update(&self, dlq: DlqStats, breaker: CircuitState) {
        self.dlq_depth.set(dlq.total_entries as i64);
        let dropped_delta = dlq.dropped_entries as i64 - self.dlq_dropped_total.get() as i64;
        if dropped_delta > 0 {
            self.dlq_dropped_total.inc_by(dropped_delta as u64);
        }
        self.breaker_open.set(matches!(breaker, CircuitState::Open) as i64);
    }
}

static GLOBAL: OnceCell<RouterMetrics> = OnceCell::new();

/// Process-wide router metrics handle, created on first use.
pub fn global(pipeline: &str) -> &'static RouterMetrics {
    GLOBAL.get_or_init(|| RouterMetrics::new(pipeline))
}
