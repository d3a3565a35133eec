//! MQTT client for receiving location reports
//!
//! Subscribes to the GPS source's location topic and forwards each
//! `{"latitude": .., "longitude": ..}` payload to the geofence engine.

use crate::domain::geometry::Position;
use crate::domain::types::LocationMessage;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Start the MQTT client and send parsed positions to the channel
///
/// Reports are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped reports are counted in metrics and logged (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    report_tx: mpsc::Sender<Position>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("geofence-ingest-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_location_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.mqtt_location_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_location_subscribed"
    );

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(position) = parse_location_message(&publish.payload) else {
                            metrics.record_report_malformed();
                            debug!(topic = %publish.topic, "location_payload_unparseable");
                            continue;
                        };

                        match report_tx.try_send(position) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                metrics.record_report_dropped();
                                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                    warn!("position_report_dropped: channel full");
                                    last_drop_warn = Instant::now();
                                }
                            }
                            Err(TrySendError::Closed(_)) => {
                                warn!("position_report_channel_closed");
                                return Ok(());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Parse a location payload into a position
///
/// Range checks are left to the engine; this only rejects payloads that are
/// not UTF-8 JSON with numeric latitude and longitude.
pub fn parse_location_message(payload: &[u8]) -> Option<Position> {
    let json_str = std::str::from_utf8(payload).ok()?;
    let message: LocationMessage = serde_json::from_str(json_str).ok()?;
    Some(message.position())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        let payload = br#"{"latitude": 45.52, "longitude": -122.68, "altitude": 50.0, "speed": 0}"#;
        assert_eq!(parse_location_message(payload), Some(Position::new(45.52, -122.68)));
    }

    #[test]
    fn test_parse_location_out_of_range_passes_through() {
        let payload = br#"{"latitude": 200, "longitude": 0}"#;
        let position = parse_location_message(payload).unwrap();
        assert!(!position.is_valid());
    }

    #[test]
    fn test_parse_invalid_payloads() {
        assert_eq!(parse_location_message(b"not json"), None);
        assert_eq!(parse_location_message(br#"{"longitude": 1.0}"#), None);
        assert_eq!(parse_location_message(&[0xff, 0xfe]), None);
    }

    #[tokio::test]
    async fn test_client_stops_when_shutdown_sender_dropped() {
        let config =
            Config::from_toml_str("[mqtt]\nhost = \"127.0.0.1\"\nport = 1\n", "inline").unwrap();
        let (report_tx, _report_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            start_mqtt_client(&config, report_tx, Arc::new(Metrics::new()), shutdown_rx),
        )
        .await
        .expect("client should stop once the shutdown sender is gone");
        assert!(result.is_ok());
    }
}
