//! Health aggregator (C11): a registry of named probes, each producing a
//! [`ComponentHealth`], rolled up into one overall [`OverallStatus`].
//! Every long-running component in the pipeline (publisher,
//! subscriber-backed consumer, resilient reader, outbox forwarder)
//! registers itself here at construction time, matching the `/health` +
//! `/ready` split `analytics-service/src/main.rs` exposes at the top level.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use resilience::with_timeout;
use serde::Serialize;

/// A single probe's result.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    pub degraded: bool,
    pub message: String,
    pub error: Option<String>,
    pub details: serde_json::Value,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            degraded: false,
            message: message.into(),
            error: None,
            details: serde_json::Value::Null,
            last_check: Utc::now(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            degraded: true,
            message: message.into(),
            error: None,
            details: serde_json::Value::Null,
            last_check: Utc::now(),
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            healthy: false,
            degraded: false,
            message: "unhealthy".to_string(),
            error: Some(error),
            details: serde_json::Value::Null,
            last_check: Utc::now(),
        }
    }

    fn timeout() -> Self {
        Self::unhealthy("timeout")
    }
}

#[async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn check_health(&self) -> ComponentHealth;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub components: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Per-probe timeout; an expired probe counts as unhealthy.
    pub probe_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { probe_timeout: Duration::from_secs(5) }
    }
}

/// `name -> HealthCheckable` registry, safe for concurrent mutation.
pub struct HealthRegistry {
    probes: RwLock<HashMap<String, Arc<dyn HealthCheckable>>>,
    config: RegistryConfig,
}

impl HealthRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self { probes: RwLock::new(HashMap::new()), config }
    }

    pub fn register(&self, name: impl Into<String>, probe: Arc<dyn HealthCheckable>) {
        self.probes.write().insert(name.into(), probe);
    }

    pub fn deregister(&self, name: &str) {
        self.probes.write().remove(name);
    }

    /// Run every registered probe under `probe_timeout`, then roll up the
    /// overall status: `unhealthy` if any non-degraded probe is
    /// unhealthy, `degraded` if any probe is degraded and none are
    /// unhealthy, otherwise `healthy`.
    pub async fn check_all(&self) -> HealthReport {
        let probes: Vec<(String, Arc<dyn HealthCheckable>)> =
            self.probes.read().iter().map(|(name, probe)| (name.clone(), probe.clone())).collect();

        let timeout = self.config.probe_timeout;
        let checks = probes.into_iter().map(|(name, probe)| async move {
            let health = with_timeout(timeout, probe.check_health())
                .await
                .unwrap_or_else(|_| ComponentHealth::timeout());
            (name, health)
        });

        let components: HashMap<String, ComponentHealth> = join_all(checks).await.into_iter().collect();

        let any_unhealthy = components.values().any(|c| !c.healthy && !c.degraded);
        let any_degraded = components.values().any(|c| c.degraded);
        let status = if any_unhealthy {
            OverallStatus::Unhealthy
        } else if any_degraded {
            OverallStatus::Degraded
        } else {
            OverallStatus::Healthy
        };

        HealthReport { status, components }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedHealth(ComponentHealth);

    #[async_trait]
    impl HealthCheckable for FixedHealth {
        async fn check_health(&self) -> ComponentHealth {
            self.0.clone()
        }
    }

    struct SlowHealth(Duration);

    #[async_trait]
    impl HealthCheckable for SlowHealth {
        async fn check_health(&self) -> ComponentHealth {
            tokio::time::sleep(self.0).await;
            ComponentHealth::healthy("eventually")
        }
    }

    #[tokio::test]
    async fn all_healthy_rolls_up_healthy() {
        let registry = HealthRegistry::new(RegistryConfig::default());
        registry.register("publisher", Arc::new(FixedHealth(ComponentHealth::healthy("ok"))));
        registry.register("reader", Arc::new(FixedHealth(ComponentHealth::healthy("ok"))));

        let report = registry.check_all().await;
        assert_eq!(report.status, OverallStatus::Healthy);
    }

    #[tokio::test]
    async fn one_degraded_rolls_up_degraded() {
        let registry = HealthRegistry::new(RegistryConfig::default());
        registry.register("publisher", Arc::new(FixedHealth(ComponentHealth::healthy("ok"))));
        registry.register("reader", Arc::new(FixedHealth(ComponentHealth::degraded("falling back"))));

        let report = registry.check_all().await;
        assert_eq!(report.status, OverallStatus::Degraded);
    }

    #[tokio::test]
    async fn one_unhealthy_wins_over_degraded() {
        let registry = HealthRegistry::new(RegistryConfig::default());
        registry.register("publisher", Arc::new(FixedHealth(ComponentHealth::unhealthy("breaker open"))));
        registry.register("reader", Arc::new(FixedHealth(ComponentHealth::degraded("falling back"))));

        let report = registry.check_all().await;
        assert_eq!(report.status, OverallStatus::Unhealthy);
    }

    #[tokio::test]
    async fn expired_probe_counts_as_unhealthy_timeout() {
        let registry = HealthRegistry::new(RegistryConfig { probe_timeout: Duration::from_millis(10) });
        registry.register("slow", Arc::new(SlowHealth(Duration::from_millis(200))));

        let report = registry.check_all().await;
        assert_eq!(report.status, OverallStatus::Unhealthy);
        assert_eq!(report.components["slow"].error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn deregister_removes_probe() {
        let registry = HealthRegistry::new(RegistryConfig::default());
        registry.register("publisher", Arc::new(FixedHealth(ComponentHealth::healthy("ok"))));
        registry.deregister("publisher");

        let report = registry.check_all().await;
        assert!(report.components.is_empty());
    }
}
