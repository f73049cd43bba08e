//! Admin HTTP surface: `/health`, `/ready`, `/admin/outbox/stats`, in the
//! same shape `analytics-service/src/main.rs` exposes for its own outbox.

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use health::{HealthRegistry, OverallStatus};
use outbox::OutboxRepository;

use crate::app::Pipeline;

pub async fn health(registry: web::Data<Arc<HealthRegistry>>) -> HttpResponse {
    let report = registry.check_all().await;
    let body = serde_json::json!({
        "status": report.status,
        "components": report.components,
    });
    match report.status {
        OverallStatus::Unhealthy => HttpResponse::ServiceUnavailable().json(body),
        _ => HttpResponse::Ok().json(body),
    }
}

pub async fn ready(registry: web::Data<Arc<HealthRegistry>>) -> HttpResponse {
    let report = registry.check_all().await;
    if report.status == OverallStatus::Unhealthy {
        HttpResponse::ServiceUnavailable().body("NOT_READY")
    } else {
        HttpResponse::Ok().body("READY")
    }
}

pub async fn outbox_stats(pipeline: web::Data<Arc<Pipeline>>) -> HttpResponse {
    let published_total = pipeline.forwarder.metrics().map(|m| m.published.get()).unwrap_or(0);
    match pipeline.outbox.pending_stats().await {
        Ok((pending, oldest_age)) => HttpResponse::Ok().json(serde_json::json!({
            "pending_count": pending,
            "oldest_pending_age_seconds": oldest_age,
            "published_total": published_total,
        })),
        Err(e) => HttpResponse::InternalServerError().body(format!("error: {e}")),
    }
}
