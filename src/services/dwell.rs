//! Per-fence dwell state machine
//!
//! Converts "is the current report inside the fence" plus elapsed time into at
//! most one transition per report:
//! - Outside -> inside emits `entered` and starts the dwell timer
//! - Inside past the threshold emits `dwell` once and clears the timer
//! - Inside -> outside emits `exited` and clears the timer
//!
//! A threshold of zero disables the dwell transition.

use crate::domain::types::FenceState;
use std::time::{Duration, Instant};

/// Classified state of a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellPhase {
    Outside,
    /// Entered, dwell timer running
    InsideFresh,
    /// Dwell already reported for this residence
    InsideDwelling,
}

/// Live state for a single fence
#[derive(Debug, Clone, Default)]
pub struct DwellTracker {
    /// Last evaluated report was inside
    triggered: bool,
    /// Set on entry, cleared on exit or once dwell has fired
    entered_at: Option<Instant>,
}

impl DwellTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> DwellPhase {
        match (self.triggered, self.entered_at) {
            (false, _) => DwellPhase::Outside,
            (true, Some(_)) => DwellPhase::InsideFresh,
            (true, None) => DwellPhase::InsideDwelling,
        }
    }

    #[inline]
    pub fn is_inside(&self) -> bool {
        self.triggered
    }

    #[inline]
    pub fn is_dwelling(&self) -> bool {
        self.phase() == DwellPhase::InsideDwelling
    }

    pub fn entered_at(&self) -> Option<Instant> {
        self.entered_at
    }

    /// Whether the running dwell timer has reached `threshold` at `now`
    fn dwell_due(&self, threshold: Duration, now: Instant) -> bool {
        if threshold.is_zero() {
            return false;
        }
        let Some(entered_at) = self.entered_at else {
            return false;
        };
        now.saturating_duration_since(entered_at) >= threshold
    }

    /// Apply one report and return the transition it causes, if any
    pub fn update(&mut self, inside: bool, threshold: Duration, now: Instant) -> Option<FenceState> {
        if inside == self.triggered && !self.dwell_due(threshold, now) {
            return None;
        }

        let state = match (inside, self.triggered) {
            (true, true) => {
                self.entered_at = None;
                FenceState::Dwell
            }
            (true, false) => {
                self.entered_at = Some(now);
                FenceState::Entered
            }
            (false, _) => {
                self.entered_at = None;
                FenceState::Exited
            }
        };
        self.triggered = inside;

        Some(state)
    }
}
