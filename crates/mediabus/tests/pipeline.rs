//! End-to-end harness: boots a full [`Pipeline`] against an in-memory
//! broker and store, publishes a `MediaEvent` the way a webhook producer
//! would, and asserts it comes out the other end of the subscriber ->
//! router -> appender chain. Unit-level seed scenarios for each component
//! live alongside that component's own source; this file only covers
//! what a single crate's test module can't: the wiring between them.

use std::sync::Arc;
use std::time::Duration;

use mediabus::{Config, Pipeline};
use model::{MediaEvent, MediaType, Source};

fn event(id: &str) -> MediaEvent {
    MediaEvent {
        event_id: id.to_string(),
        source: Source::Plex,
        user_id: 1,
        media_type: MediaType::Movie,
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

async fn test_pipeline() -> Arc<Pipeline> {
    let config = Config { nats_enabled: false, ..Config::default() };
    Pipeline::bootstrap(config).await.expect("pipeline bootstraps against the fake broker")
}

#[tokio::test]
async fn published_event_flows_through_router_into_the_appender() {
    let pipeline = test_pipeline().await;
    pipeline.run().await.expect("pipeline tasks start");

    pipeline.publisher.publish(&event("e1")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    pipeline.appender.flush().await.unwrap();

    let snapshot = pipeline.appender.stats().snapshot();
    assert_eq!(snapshot.events_received, 1);
    assert_eq!(snapshot.events_flushed, 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn cross_source_duplicate_dispatches_once() {
    let pipeline = test_pipeline().await;
    pipeline.run().await.expect("pipeline tasks start");

    let mut plex = event("plex-1");
    plex.rating_key = Some("54321".to_string());
    plex.machine_id = Some("d1".to_string());

    let mut tautulli = plex.clone();
    tautulli.event_id = "tautulli-1".to_string();
    tautulli.source = Source::Tautulli;
    tautulli.session_key = Some("sess-xyz".to_string());

    pipeline.publisher.publish(&plex).await.unwrap();
    pipeline.publisher.publish(&tautulli).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    pipeline.appender.flush().await.unwrap();

    // Both events were seen, but the cross-source dedup middleware only
    // lets the first through to the handler.
    let snapshot = pipeline.appender.stats().snapshot();
    assert_eq!(snapshot.events_received, 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn health_report_starts_healthy() {
    let pipeline = test_pipeline().await;
    let report = pipeline.health.check_all().await;
    assert_eq!(report.status, health::OverallStatus::Healthy);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn outbox_stats_start_empty() {
    use outbox::OutboxRepository;

    let pipeline = test_pipeline().await;
    let (pending, age) = pipeline.outbox.pending_stats().await.unwrap();
    assert_eq!(pending, 0);
    assert_eq!(age, 0);
    pipeline.shutdown().await;
}
