//! Configuration loading from TOML files
//!
//! The binary picks the file with `--config <path>` (or `CONFIG_FILE`),
//! defaulting to `config/dev.toml`. A missing or invalid file falls back to
//! defaults.

use crate::domain::error::GeofenceError;
use crate::domain::geometry::BoundingBox;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic carrying location reports from the GPS source
    #[serde(default = "default_location_topic")]
    pub location_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_location_topic() -> String {
    "gps/location".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            location_topic: default_location_topic(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceConfig {
    /// Dwell threshold in seconds (0 disables dwell events)
    #[serde(default = "default_dwell_transition_secs")]
    pub dwell_transition_secs: u64,
    /// Capacity of the position report queue
    #[serde(default = "default_report_queue_size")]
    pub report_queue_size: usize,
    /// Capacity of each subscriber's event queue
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_dwell_transition_secs() -> u64 {
    20
}

fn default_report_queue_size() -> usize {
    1000
}

fn default_subscriber_buffer() -> usize {
    256
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            dwell_transition_secs: default_dwell_transition_secs(),
            report_queue_size: default_report_queue_size(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

/// Fence defined in the config file and added at startup
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FenceDefinition {
    pub name: String,
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl FenceDefinition {
    pub fn bounding_box(&self) -> Result<BoundingBox, GeofenceError> {
        BoundingBox::new(self.min_latitude, self.max_latitude, self.min_longitude, self.max_longitude)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// HTTP control API port (0 to disable)
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: default_api_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for fence transition events (QoS 0)
    #[serde(default = "default_fence_topic")]
    pub fence_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    /// Interval for publishing metrics (seconds)
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_fence_topic() -> String {
    "geofence/fence".to_string()
}

fn default_metrics_topic() -> String {
    "geofence/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    30
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            fence_topic: default_fence_topic(),
            metrics_topic: default_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Unique site identifier, included in egress payloads
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "geofence".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub fences: Vec<FenceDefinition>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_location_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    dwell_transition_secs: u64,
    report_queue_size: usize,
    subscriber_buffer: usize,
    api_port: u16,
    metrics_interval_secs: u64,
    mqtt_egress_enabled: bool,
    mqtt_egress_fence_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
    fences: Vec<FenceDefinition>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_location_topic: toml_config.mqtt.location_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            dwell_transition_secs: toml_config.geofence.dwell_transition_secs,
            report_queue_size: toml_config.geofence.report_queue_size,
            subscriber_buffer: toml_config.geofence.subscriber_buffer,
            api_port: toml_config.api.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_fence_topic: toml_config.mqtt_egress.fence_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config.mqtt_egress.metrics_publish_interval_secs,
            fences: toml_config.fences,
            config_file,
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {}", source))?;
        Ok(Self::from_toml(toml_config, source.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load configuration from a path, falling back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_location_topic(&self) -> &str {
        &self.mqtt_location_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn dwell_transition_secs(&self) -> u64 {
        self.dwell_transition_secs
    }

    pub fn dwell_threshold(&self) -> Duration {
        Duration::from_secs(self.dwell_transition_secs)
    }

    pub fn report_queue_size(&self) -> usize {
        self.report_queue_size
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer
    }

    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_fence_topic(&self) -> &str {
        &self.mqtt_egress_fence_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    /// Fences to add at startup
    pub fn fences(&self) -> &[FenceDefinition] {
        &self.fences
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the dwell threshold
    #[cfg(test)]
    pub fn with_dwell_transition_secs(mut self, secs: u64) -> Self {
        self.dwell_transition_secs = secs;
        self
    }
}
