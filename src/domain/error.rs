//! Errors returned by fence configuration operations

use thiserror::Error;

/// Recoverable failures of add/remove
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeofenceError {
    /// A fence with this name already exists.
    #[error("fence with name '{0}' exists")]
    DuplicateName(String),
    /// Bounding box has `min > max` on an axis or a non-finite coordinate.
    #[error("invalid bounding box: {0}")]
    InvalidGeometry(String),
    /// No fence with this name.
    #[error("fence '{0}' not found")]
    NotFound(String),
}
