//! MQTT publisher for fence events
//!
//! Subscribes to the event dispatcher and republishes each transition:
//! - geofence/fence - `{"site","name","state","ts"}` per transition (QoS 0)
//! - geofence/metrics - periodic metrics snapshot (QoS 0)
//!
//! On shutdown queued events are drained and the connection is closed with a
//! DISCONNECT so QoS 0 publishes already handed to the client are flushed.

use crate::domain::types::{epoch_ms, FenceEvent, FenceState};
use crate::infra::config::Config;
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::services::dispatcher::{EventDispatcher, Subscription};
use crate::services::registry::FenceRegistry;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wire payload for a fence transition
#[derive(Debug, Clone, Serialize)]
pub struct FenceEventPayload {
    pub site: String,
    pub name: String,
    pub state: FenceState,
    /// Publish time (epoch ms)
    pub ts: u64,
}

impl FenceEventPayload {
    pub fn new(site: &str, event: &FenceEvent, ts: u64) -> Self {
        Self { site: site.to_string(), name: event.name.clone(), state: event.state, ts }
    }
}

/// Wire payload for a metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    pub ts: u64,
    #[serde(flatten)]
    pub summary: MetricsSummary,
}

/// Upper bound on flushing the eventloop at shutdown
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT publisher actor
pub struct MqttPublisher {
    client: AsyncClient,
    eventloop_task: JoinHandle<()>,
    subscription: Subscription,
    dispatcher: Arc<EventDispatcher>,
    registry: Arc<FenceRegistry>,
    metrics: Arc<Metrics>,
    site_id: String,
    fence_topic: String,
    metrics_topic: String,
    metrics_interval: Duration,
}

impl MqttPublisher {
    /// Create a new MQTT publisher and subscribe it to the dispatcher
    pub fn new(
        config: &Config,
        dispatcher: Arc<EventDispatcher>,
        registry: Arc<FenceRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let client_id = format!("geofence-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        let eventloop_task = tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("mqtt_egress_disconnected");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Fences already inside at startup are announced once
        let subscription = dispatcher.subscribe_with_replay(&registry);

        Self {
            client,
            eventloop_task,
            subscription,
            dispatcher,
            registry,
            metrics,
            site_id: config.site_id().to_string(),
            fence_topic: config.mqtt_egress_fence_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
            metrics_interval: Duration::from_secs(config.mqtt_egress_metrics_interval_secs().max(1)),
        }
    }

    /// Run the publisher loop until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            fence_topic = %self.fence_topic,
            metrics_topic = %self.metrics_topic,
            subscription = %self.subscription.id,
            "mqtt_egress_started"
        );

        let mut metrics_tick = tokio::time::interval(self.metrics_interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(event) = self.subscription.rx.try_recv() {
                            self.publish_event(&event).await;
                        }
                        break;
                    }
                }
                event = self.subscription.rx.recv() => {
                    match event {
                        Some(event) => self.publish_event(&event).await,
                        None => break,
                    }
                }
                _ = metrics_tick.tick() => {
                    self.publish_metrics().await;
                }
            }
        }

        self.dispatcher.unsubscribe(self.subscription.id);
        self.flush().await;
    }

    /// Queue a DISCONNECT behind pending publishes and wait for the eventloop
    async fn flush(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "mqtt_egress_disconnect_failed");
        }
        let mut eventloop_task = self.eventloop_task;
        if tokio::time::timeout(FLUSH_TIMEOUT, &mut eventloop_task).await.is_err() {
            warn!("mqtt_egress_flush_timeout");
            eventloop_task.abort();
        }
    }

    async fn publish_event(&self, event: &FenceEvent) {
        let payload = FenceEventPayload::new(&self.site_id, event, epoch_ms());
        let Ok(json) = serde_json::to_string(&payload) else {
            return;
        };
        if let Err(e) =
            self.client.publish(&self.fence_topic, QoS::AtMostOnce, false, json.into_bytes()).await
        {
            debug!(error = %e, name = %event.name, "mqtt_egress_event_failed");
        }
    }

    async fn publish_metrics(&self) {
        let payload = MetricsPayload {
            site: self.site_id.clone(),
            ts: epoch_ms(),
            summary: self.metrics.snapshot(self.registry.len(), self.dispatcher.subscriber_count()),
        };
        let Ok(json) = serde_json::to_string(&payload) else {
            return;
        };
        if let Err(e) =
            self.client.publish(&self.metrics_topic, QoS::AtMostOnce, false, json.into_bytes()).await
        {
            debug!(error = %e, "mqtt_egress_metrics_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_event_payload_json() {
        let event = FenceEvent::new("depot", FenceState::Entered);
        let payload = FenceEventPayload::new("truck-7", &event, 1767617600000);
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(
            json,
            r#"{"site":"truck-7","name":"depot","state":"entered","ts":1767617600000}"#
        );
    }

    #[test]
    fn test_metrics_payload_flattens_summary() {
        let metrics = Metrics::new();
        metrics.record_report_processed(12);
        let payload =
            MetricsPayload { site: "truck-7".to_string(), ts: 1, summary: metrics.snapshot(3, 1) };
        let value: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["site"], "truck-7");
        assert_eq!(value["reports_total"], 1);
        assert_eq!(value["fence_count"], 3);
    }

    #[tokio::test]
    async fn test_run_drains_and_returns_on_shutdown() {
        // Nothing listens on port 1; the eventloop keeps retrying
        let config =
            Config::from_toml_str("[mqtt]\nhost = \"127.0.0.1\"\nport = 1\n", "inline").unwrap();
        let metrics = Arc::new(Metrics::new());
        let dispatcher = Arc::new(EventDispatcher::new(8, metrics.clone()));
        let registry = Arc::new(FenceRegistry::default());

        let publisher =
            MqttPublisher::new(&config, dispatcher.clone(), registry.clone(), metrics.clone());
        assert_eq!(dispatcher.subscriber_count(), 1);

        dispatcher.publish(&FenceEvent::new("depot", FenceState::Entered));
        dispatcher.publish(&FenceEvent::new("depot", FenceState::Exited));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(FLUSH_TIMEOUT + Duration::from_secs(2), publisher.run(shutdown_rx))
            .await
            .expect("publisher should finish after flushing");
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_sender_dropped() {
        let config =
            Config::from_toml_str("[mqtt]\nhost = \"127.0.0.1\"\nport = 1\n", "inline").unwrap();
        let metrics = Arc::new(Metrics::new());
        let dispatcher = Arc::new(EventDispatcher::new(8, metrics.clone()));
        let publisher =
            MqttPublisher::new(&config, dispatcher.clone(), Arc::new(FenceRegistry::default()), metrics);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        tokio::time::timeout(FLUSH_TIMEOUT + Duration::from_secs(2), publisher.run(shutdown_rx))
            .await
            .expect("publisher should stop once the shutdown sender is gone");
    }
}
