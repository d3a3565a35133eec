//! Position ingest - evaluates each report against the registry
//!
//! The engine is the only caller of the registry's evaluation pass. For every
//! report it takes the registry lock once, collects transitions, releases the
//! lock, and only then hands the events to the dispatcher.

use crate::domain::geometry::Position;
use crate::infra::metrics::Metrics;
use crate::services::dispatcher::EventDispatcher;
use crate::services::registry::{FenceEvents, FenceRegistry};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Geofence evaluation engine
pub struct GeofenceEngine {
    registry: Arc<FenceRegistry>,
    dispatcher: Arc<EventDispatcher>,
    metrics: Arc<Metrics>,
}

impl GeofenceEngine {
    pub fn new(
        registry: Arc<FenceRegistry>,
        dispatcher: Arc<EventDispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { registry, dispatcher, metrics }
    }

    pub fn registry(&self) -> &Arc<FenceRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Handle one report from the location source. Invalid reports are dropped.
    pub fn on_position_report(&self, latitude: f64, longitude: f64) {
        self.ingest(Position::new(latitude, longitude), None);
    }

    /// Handle one report evaluated at an explicit instant
    pub fn on_position_report_at(&self, latitude: f64, longitude: f64, now: Instant) {
        self.ingest(Position::new(latitude, longitude), Some(now));
    }

    fn ingest(&self, position: Position, now: Option<Instant>) {
        if !position.is_valid() {
            self.metrics.record_report_rejected();
            debug!(
                latitude = %position.latitude,
                longitude = %position.longitude,
                "position_report_rejected"
            );
            return;
        }

        let process_start = Instant::now();
        let events = match now {
            Some(now) => self.registry.evaluate_at(position, now),
            None => self.registry.evaluate(position),
        };
        self.metrics.record_report_processed(process_start.elapsed().as_micros() as u64);

        self.dispatch(position, events);
    }

    fn dispatch(&self, position: Position, events: FenceEvents) {
        for event in &events {
            info!(
                name = %event.name,
                state = %event.state,
                latitude = %position.latitude,
                longitude = %position.longitude,
                "fence_transition"
            );
        }
        self.dispatcher.publish_all(&events);
    }

    /// Consume reports until the channel closes or shutdown is signalled
    pub async fn run(
        &self,
        mut report_rx: mpsc::Receiver<Position>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(fences = %self.registry.len(), "geofence_engine_started");

        loop {
            tokio::select! {
                report = report_rx.recv() => {
                    match report {
                        Some(position) => self.ingest(position, None),
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("geofence_engine_shutdown");
                        break;
                    }
                }
            }
        }

        info!("geofence_engine_stopped");
    }
}
