use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use mediabus::{admin, Config, Pipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug,mediabus=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(nats_enabled = config.nats_enabled, http_port = config.http_port, "starting mediabus");

    let pipeline = Pipeline::bootstrap(config.clone()).await.context("failed to bootstrap pipeline")?;
    pipeline.run().await.context("failed to start pipeline tasks")?;

    let health = pipeline.health.clone();
    let pipeline_data = pipeline.clone();
    let http_port = config.http_port;

    tracing::info!("starting admin HTTP server on 0.0.0.0:{http_port}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(health.clone()))
            .app_data(web::Data::new(pipeline_data.clone()))
            .route("/health", web::get().to(admin::health))
            .route("/ready", web::get().to(admin::ready))
            .route("/admin/outbox/stats", web::get().to(admin::outbox_stats))
    })
    .bind(("0.0.0.0", http_port))
    .context("failed to bind admin server")?
    .run()
    .await
    .context("admin server error")
}
