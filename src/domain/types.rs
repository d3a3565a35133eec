//! Shared types for the geofence service

use crate::domain::geometry::{BoundingBox, Position};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds (for egress timestamps only)
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Transition reported for a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FenceState {
    Entered,
    Exited,
    Dwell,
}

impl FenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FenceState::Entered => "entered",
            FenceState::Exited => "exited",
            FenceState::Dwell => "dwell",
        }
    }
}

impl std::fmt::Display for FenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event stream item delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FenceEvent {
    pub name: String,
    pub state: FenceState,
}

impl FenceEvent {
    #[inline]
    pub fn new(name: impl Into<String>, state: FenceState) -> Self {
        Self { name: name.into(), state }
    }
}

/// Point-in-time copy of a fence, as returned by list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FenceSnapshot {
    pub name: String,
    pub bbox: BoundingBox,
    /// Last evaluated report was inside the fence
    pub inside: bool,
    /// Inside and the dwell transition has already fired
    pub dwelling: bool,
}

/// Location message published by the GPS source
///
/// Only latitude and longitude are used; speed, altitude and friends are ignored.
#[derive(Debug, Deserialize)]
pub struct LocationMessage {
    #[serde(deserialize_with = "deserialize_coordinate")]
    pub latitude: f64,
    #[serde(deserialize_with = "deserialize_coordinate")]
    pub longitude: f64,
}

impl LocationMessage {
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

/// Accept coordinates as JSON numbers or numeric strings
fn deserialize_coordinate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct CoordinateVisitor;

    impl<'de> Visitor<'de> for CoordinateVisitor {
        type Value = f64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number or numeric string")
        }

        fn visit_f64<E>(self, value: f64) -> Result<f64, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<f64, E>
        where
            E: de::Error,
        {
            Ok(value as f64)
        }

        fn visit_u64<E>(self, value: u64) -> Result<f64, E>
        where
            E: de::Error,
        {
            Ok(value as f64)
        }

        fn visit_str<E>(self, value: &str) -> Result<f64, E>
        where
            E: de::Error,
        {
            value.trim().parse::<f64>().map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_any(CoordinateVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_state_serializes_lowercase() {
        let event = FenceEvent::new("home", FenceState::Dwell);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"name":"home","state":"dwell"}"#);
        assert_eq!(FenceState::Exited.to_string(), "exited");
    }

    #[test]
    fn test_location_message_numbers() {
        let msg: LocationMessage =
            serde_json::from_str(r#"{"latitude": 45.5, "longitude": -122, "speed": 3.2}"#).unwrap();
        assert_eq!(msg.position(), Position::new(45.5, -122.0));
    }

    #[test]
    fn test_location_message_strings() {
        let msg: LocationMessage =
            serde_json::from_str(r#"{"latitude": "45.5", "longitude": " 7.25 "}"#).unwrap();
        assert_eq!(msg.position(), Position::new(45.5, 7.25));
    }

    #[test]
    fn test_location_message_missing_field() {
        assert!(serde_json::from_str::<LocationMessage>(r#"{"latitude": 1.0}"#).is_err());
        assert!(serde_json::from_str::<LocationMessage>(r#"{"latitude": "x", "longitude": 1}"#)
            .is_err());
    }
}
