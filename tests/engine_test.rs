//! End-to-end tests: location payload -> engine -> subscribers and HTTP API

use geofence_service::domain::{BoundingBox, FenceEvent, FenceState};
use geofence_service::infra::Metrics;
use geofence_service::io::api::route;
use geofence_service::io::mqtt::parse_location_message;
use geofence_service::io::ApiState;
use geofence_service::services::{EventDispatcher, FenceRegistry, GeofenceEngine, Subscription};
use hyper::{Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

struct Harness {
    engine: Arc<GeofenceEngine>,
    api: ApiState,
    metrics: Arc<Metrics>,
}

fn harness(dwell_secs: u64) -> Harness {
    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(FenceRegistry::new(Duration::from_secs(dwell_secs)));
    let dispatcher = Arc::new(EventDispatcher::new(32, metrics.clone()));
    let api = ApiState {
        registry: registry.clone(),
        dispatcher: dispatcher.clone(),
        metrics: metrics.clone(),
        site_id: "test".to_string(),
    };
    let engine = Arc::new(GeofenceEngine::new(registry, dispatcher, metrics.clone()));
    Harness { engine, api, metrics }
}

fn drain(sub: &mut Subscription) -> Vec<FenceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = sub.rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_fence_added_over_api_drives_events() {
    let h = harness(20);
    let body = br#"{"name":"depot","bbox":{"min_latitude":10,"max_latitude":20,"min_longitude":10,"max_longitude":20}}"#;
    let response = route(&h.api, &Method::POST, "/fences", body);
    assert_eq!(response.status(), StatusCode::OK);

    let mut sub = h.engine.dispatcher().subscribe();
    let t0 = Instant::now();

    let position = parse_location_message(br#"{"latitude": 15.0, "longitude": 15.0}"#).unwrap();
    h.engine.on_position_report_at(position.latitude, position.longitude, t0);
    h.engine.on_position_report_at(15.0, 15.0, t0 + Duration::from_secs(20));
    h.engine.on_position_report_at(5.0, 5.0, t0 + Duration::from_secs(21));

    assert_eq!(
        drain(&mut sub),
        vec![
            FenceEvent::new("depot", FenceState::Entered),
            FenceEvent::new("depot", FenceState::Dwell),
            FenceEvent::new("depot", FenceState::Exited),
        ]
    );
    assert_eq!(h.metrics.reports_total(), 3);
}

#[test]
fn test_removed_fence_goes_silent() {
    let h = harness(0);
    h.engine.registry().add("yard", BoundingBox::new(0.0, 1.0, 0.0, 1.0).unwrap()).unwrap();
    let mut sub = h.engine.dispatcher().subscribe();

    h.engine.on_position_report(0.5, 0.5);
    assert_eq!(drain(&mut sub), vec![FenceEvent::new("yard", FenceState::Entered)]);

    let response = route(&h.api, &Method::DELETE, "/fences/yard", b"");
    assert_eq!(response.status(), StatusCode::OK);

    h.engine.on_position_report(5.0, 5.0);
    assert!(drain(&mut sub).is_empty());

    let response = route(&h.api, &Method::DELETE, "/fences/yard", b"");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_late_subscriber_replay() {
    let h = harness(10);
    h.engine.registry().add("a", BoundingBox::new(0.0, 1.0, 0.0, 1.0).unwrap()).unwrap();
    h.engine.registry().add("b", BoundingBox::new(0.0, 2.0, 0.0, 2.0).unwrap()).unwrap();
    h.engine.registry().add("c", BoundingBox::new(5.0, 6.0, 5.0, 6.0).unwrap()).unwrap();

    let t0 = Instant::now();
    h.engine.on_position_report_at(0.5, 0.5, t0);
    h.engine.on_position_report_at(1.5, 1.5, t0 + Duration::from_secs(10));

    let mut sub = h.engine.dispatcher().subscribe_with_replay(h.engine.registry());

    assert_eq!(
        drain(&mut sub),
        vec![FenceEvent::new("b", FenceState::Entered), FenceEvent::new("b", FenceState::Dwell)]
    );
}

#[test]
fn test_unsubscribed_receiver_gets_nothing() {
    let h = harness(20);
    h.engine.registry().add("yard", BoundingBox::new(0.0, 1.0, 0.0, 1.0).unwrap()).unwrap();
    let mut kept = h.engine.dispatcher().subscribe();
    let mut gone = h.engine.dispatcher().subscribe();

    assert!(h.engine.dispatcher().unsubscribe(gone.id));
    assert!(!h.engine.dispatcher().unsubscribe(gone.id));

    h.engine.on_position_report(0.5, 0.5);

    assert_eq!(drain(&mut kept).len(), 1);
    assert!(drain(&mut gone).is_empty());
    assert_eq!(h.engine.dispatcher().subscriber_count(), 1);
}

#[tokio::test]
async fn test_engine_task_with_concurrent_configuration() {
    let h = harness(0);
    let mut sub = h.engine.dispatcher().subscribe();
    let (tx, rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.run(rx, shutdown_rx).await });

    h.engine.registry().add("yard", BoundingBox::new(0.0, 1.0, 0.0, 1.0).unwrap()).unwrap();
    tx.send(parse_location_message(br#"{"latitude": 0.5, "longitude": 0.5}"#).unwrap())
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), sub.rx.recv())
        .await
        .expect("event should arrive")
        .expect("dispatcher should stay open");
    assert_eq!(event, FenceEvent::new("yard", FenceState::Entered));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}
