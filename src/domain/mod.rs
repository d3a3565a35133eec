//! Domain models - geometry, fence events and errors
//!
//! This module contains the canonical data types used throughout the system:
//! - `BoundingBox` / `Position` - rectangle geometry and containment
//! - `FenceEvent` / `FenceState` - transitions delivered to subscribers
//! - `FenceSnapshot` - read-only copy of a fence for listing
//! - `GeofenceError` - failures of configuration operations

pub mod error;
pub mod geometry;
pub mod types;

pub use error::GeofenceError;
pub use geometry::{BoundingBox, Position};
pub use types::{FenceEvent, FenceSnapshot, FenceState};
