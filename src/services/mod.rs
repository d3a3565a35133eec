//! Services - fence state and event processing
//!
//! This module contains the core logic:
//! - `registry` - Fence definitions and live state under one lock
//! - `dwell` - Per-fence entered/dwell/exited state machine
//! - `dispatcher` - Publish/subscribe fan-out of transition events
//! - `engine` - Position ingest, the per-report evaluation loop

pub mod dispatcher;
pub mod dwell;
pub mod engine;
pub mod registry;

// Re-export commonly used types
pub use dispatcher::{EventDispatcher, Subscription, SubscriptionId};
pub use engine::GeofenceEngine;
pub use registry::{FenceRegistry, DEFAULT_DWELL_THRESHOLD};
