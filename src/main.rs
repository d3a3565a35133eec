//! Geofence service - rectangular fence monitoring for a single GPS source
//!
//! Module structure:
//! - `domain/` - Core types (BoundingBox, FenceEvent, errors)
//! - `io/` - External interfaces (MQTT ingest/egress, HTTP API)
//! - `services/` - Business logic (FenceRegistry, EventDispatcher, GeofenceEngine)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use geofence_service::infra::{Config, Metrics};
use geofence_service::io::{start_api_server, ApiState, MqttPublisher};
use geofence_service::services::{EventDispatcher, FenceRegistry, GeofenceEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Upper bound on waiting for the MQTT publisher at shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Geofence service - enter/exit/dwell events for named bounding boxes
#[derive(Parser, Debug)]
#[command(name = "geofence-service", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "geofence-service starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        location_topic = %config.mqtt_location_topic(),
        dwell_transition_secs = %config.dwell_transition_secs(),
        fences = %config.fences().len(),
        api_port = %config.api_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(FenceRegistry::new(config.dwell_threshold()));
    registry.add_definitions(config.fences());
    let dispatcher = Arc::new(EventDispatcher::new(config.subscriber_buffer(), metrics.clone()));

    // Bounded so a stalled engine sheds reports instead of buffering them
    let (report_tx, report_rx) = mpsc::channel(config.report_queue_size().max(1));

    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = geofence_service::io::mqtt::start_mqtt_client(
            &mqtt_config,
            report_tx,
            mqtt_metrics,
            mqtt_shutdown,
        )
        .await
        {
            tracing::error!(error = %e, "MQTT client error");
        }
    });

    let publisher_task = if config.mqtt_egress_enabled() {
        let publisher =
            MqttPublisher::new(&config, dispatcher.clone(), registry.clone(), metrics.clone());
        let publisher_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        }))
    } else {
        None
    };

    let api_port = config.api_port();
    if api_port > 0 {
        let state = Arc::new(ApiState {
            registry: registry.clone(),
            dispatcher: dispatcher.clone(),
            metrics: metrics.clone(),
            site_id: config.site_id().to_string(),
        });
        let api_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_api_server(api_port, state, api_shutdown).await {
                tracing::error!(error = %e, "API server error");
            }
        });
    }

    let reporter_metrics = metrics.clone();
    let reporter_registry = registry.clone();
    let reporter_dispatcher = dispatcher.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = reporter_metrics
                .report(reporter_registry.len(), reporter_dispatcher.subscriber_count());
            summary.log();
        }
    });

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let engine = GeofenceEngine::new(registry, dispatcher, metrics);
    engine.run(report_rx, shutdown_rx).await;

    // Let the publisher drain queued transitions before the runtime goes away
    if let Some(task) = publisher_task {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            tracing::warn!("mqtt_egress_shutdown_timeout");
        }
    }

    info!("geofence-service shutdown complete");
    Ok(())
}
