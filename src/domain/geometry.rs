//! Axis-aligned bounding boxes in latitude/longitude space
//!
//! Containment is a plain rectangle test with inclusive bounds. There is no
//! geodesic correction and no antimeridian wrapping.

use crate::domain::error::GeofenceError;
use serde::{Deserialize, Serialize};

/// Maximum absolute latitude in degrees
pub const MAX_LATITUDE: f64 = 90.0;

/// Maximum absolute longitude in degrees
pub const MAX_LONGITUDE: f64 = 180.0;

/// A single position sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    #[inline]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// True if both coordinates are finite and within the WGS84 ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= MAX_LATITUDE
            && self.longitude.abs() <= MAX_LONGITUDE
    }
}

/// Rectangle defined by `(min_lat, max_lat, min_lon, max_lon)`
///
/// Construction goes through [`BoundingBox::new`], so `min <= max` holds on both
/// axes for every value of this type, including deserialized ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBoundingBox")]
pub struct BoundingBox {
    min_latitude: f64,
    max_latitude: f64,
    min_longitude: f64,
    max_longitude: f64,
}

/// Unvalidated wire form of a bounding box
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawBoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl TryFrom<RawBoundingBox> for BoundingBox {
    type Error = GeofenceError;

    fn try_from(raw: RawBoundingBox) -> Result<Self, Self::Error> {
        Self::new(raw.min_latitude, raw.max_latitude, raw.min_longitude, raw.max_longitude)
    }
}

impl BoundingBox {
    /// Validate and build a bounding box
    pub fn new(
        min_latitude: f64,
        max_latitude: f64,
        min_longitude: f64,
        max_longitude: f64,
    ) -> Result<Self, GeofenceError> {
        let coords = [min_latitude, max_latitude, min_longitude, max_longitude];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(GeofenceError::InvalidGeometry("non-finite coordinate".to_string()));
        }
        if min_latitude > max_latitude {
            return Err(GeofenceError::InvalidGeometry(format!(
                "min_latitude {min_latitude} > max_latitude {max_latitude}"
            )));
        }
        if min_longitude > max_longitude {
            return Err(GeofenceError::InvalidGeometry(format!(
                "min_longitude {min_longitude} > max_longitude {max_longitude}"
            )));
        }

        Ok(Self { min_latitude, max_latitude, min_longitude, max_longitude })
    }

    pub fn min_latitude(&self) -> f64 {
        self.min_latitude
    }

    pub fn max_latitude(&self) -> f64 {
        self.max_latitude
    }

    pub fn min_longitude(&self) -> f64 {
        self.min_longitude
    }

    pub fn max_longitude(&self) -> f64 {
        self.max_longitude
    }

    /// Inclusive containment test
    #[inline]
    pub fn contains(&self, point: Position) -> bool {
        contains(point, self)
    }
}

/// True iff `point` lies inside `bbox`, bounds included
#[inline]
pub fn contains(point: Position, bbox: &BoundingBox) -> bool {
    bbox.min_latitude <= point.latitude
        && point.latitude <= bbox.max_latitude
        && bbox.min_longitude <= point.longitude
        && point.longitude <= bbox.max_longitude
}
