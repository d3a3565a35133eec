//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for receiving location reports
//! - `mqtt_egress` - MQTT publisher for fence events and metrics
//! - `api` - HTTP control API (fence add/remove/list, dwell threshold)
//! - `prometheus` - Prometheus text formatting for `/metrics`

pub mod api;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;

// Re-export commonly used types
pub use api::{start_api_server, ApiState};
pub use mqtt_egress::MqttPublisher;
