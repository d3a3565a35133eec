//! Fence registry - the single owner of fence definitions and live state
//!
//! Every operation takes the same lock: add/remove/list from configuration
//! callers, threshold get/set, and the evaluation pass run once per position
//! report. The lock only covers in-memory work; events collected by an
//! evaluation are handed back to the caller for delivery after release.
//!
//! Storage is an insertion-ordered `Vec` plus a name index, so duplicate checks
//! are O(1) and evaluation order is deterministic.

use crate::domain::error::GeofenceError;
use crate::domain::geometry::{BoundingBox, Position};
use crate::domain::types::{FenceEvent, FenceSnapshot};
use crate::infra::config::FenceDefinition;
use crate::services::dwell::DwellTracker;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default dwell threshold (20 seconds)
pub const DEFAULT_DWELL_THRESHOLD: Duration = Duration::from_secs(20);

/// Events produced by one evaluation pass
pub type FenceEvents = SmallVec<[FenceEvent; 4]>;

/// A named fence and its live dwell state
#[derive(Debug, Clone)]
struct Fence {
    name: String,
    bbox: BoundingBox,
    dwell: DwellTracker,
}

impl Fence {
    fn snapshot(&self) -> FenceSnapshot {
        FenceSnapshot {
            name: self.name.clone(),
            bbox: self.bbox,
            inside: self.dwell.is_inside(),
            dwelling: self.dwell.is_dwelling(),
        }
    }
}

struct RegistryInner {
    /// Fences in insertion order
    fences: Vec<Fence>,
    /// name -> index into `fences`
    index: FxHashMap<String, usize>,
    dwell_threshold: Duration,
}

impl RegistryInner {
    fn for_each_evaluate(
        &mut self,
        point: Position,
        dwell_threshold: Duration,
        now: Instant,
    ) -> FenceEvents {
        let mut events = FenceEvents::new();

        for fence in &mut self.fences {
            let inside = fence.bbox.contains(point);
            if let Some(state) = fence.dwell.update(inside, dwell_threshold, now) {
                events.push(FenceEvent::new(fence.name.clone(), state));
            }
        }

        events
    }
}

/// Thread-safe fence registry
pub struct FenceRegistry {
    inner: Mutex<RegistryInner>,
}

impl FenceRegistry {
    pub fn new(dwell_threshold: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                fences: Vec::new(),
                index: FxHashMap::default(),
                dwell_threshold,
            }),
        }
    }

    /// Add a fence. Starts outside with no dwell timer.
    pub fn add(&self, name: &str, bbox: BoundingBox) -> Result<(), GeofenceError> {
        let mut inner = self.inner.lock();

        if inner.index.contains_key(name) {
            return Err(GeofenceError::DuplicateName(name.to_string()));
        }

        let idx = inner.fences.len();
        inner.fences.push(Fence { name: name.to_string(), bbox, dwell: DwellTracker::new() });
        inner.index.insert(name.to_string(), idx);
        drop(inner);

        info!(
            name = %name,
            min_latitude = %bbox.min_latitude(),
            max_latitude = %bbox.max_latitude(),
            min_longitude = %bbox.min_longitude(),
            max_longitude = %bbox.max_longitude(),
            "fence_added"
        );
        Ok(())
    }

    /// Add fences from config, skipping any that are invalid or duplicated.
    /// Returns the number added.
    pub fn add_definitions(&self, definitions: &[FenceDefinition]) -> usize {
        let mut added = 0;
        for def in definitions {
            let result = def.bounding_box().and_then(|bbox| self.add(&def.name, bbox));
            match result {
                Ok(()) => added += 1,
                Err(e) => warn!(name = %def.name, error = %e, "fence_definition_skipped"),
            }
        }
        added
    }

    /// Remove a fence. No event is emitted.
    pub fn remove(&self, name: &str) -> Result<(), GeofenceError> {
        let mut inner = self.inner.lock();

        let Some(idx) = inner.index.remove(name) else {
            return Err(GeofenceError::NotFound(name.to_string()));
        };
        inner.fences.remove(idx);

        // Shift indices of everything after the removed slot
        let RegistryInner { fences, index, .. } = &mut *inner;
        for (i, fence) in fences.iter().enumerate().skip(idx) {
            if let Some(slot) = index.get_mut(&fence.name) {
                *slot = i;
            }
        }
        drop(inner);

        info!(name = %name, "fence_removed");
        Ok(())
    }

    /// Snapshot of every fence in insertion order
    pub fn list(&self) -> Vec<FenceSnapshot> {
        self.inner.lock().fences.iter().map(Fence::snapshot).collect()
    }

    /// Snapshot of a single fence
    pub fn get(&self, name: &str) -> Option<FenceSnapshot> {
        let inner = self.inner.lock();
        let idx = *inner.index.get(name)?;
        inner.fences.get(idx).map(Fence::snapshot)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dwell_threshold(&self) -> Duration {
        self.inner.lock().dwell_threshold
    }

    /// Set the dwell threshold; zero disables the dwell transition
    pub fn set_dwell_threshold(&self, threshold: Duration) {
        self.inner.lock().dwell_threshold = threshold;
        info!(seconds = %threshold.as_secs(), "dwell_threshold_set");
    }

    /// Evaluate a report against every fence, reading the clock under the lock
    pub fn evaluate(&self, point: Position) -> FenceEvents {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let threshold = inner.dwell_threshold;
        let events = inner.for_each_evaluate(point, threshold, now);
        drop(inner);

        if !events.is_empty() {
            debug!(event_count = %events.len(), "fences_evaluated");
        }
        events
    }

    /// Evaluate a report at an explicit instant
    pub fn evaluate_at(&self, point: Position, now: Instant) -> FenceEvents {
        let mut inner = self.inner.lock();
        let threshold = inner.dwell_threshold;
        inner.for_each_evaluate(point, threshold, now)
    }
}

impl Default for FenceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_DWELL_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::FenceState;
    use std::sync::Arc;
    use std::thread;

    fn bbox(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> BoundingBox {
        BoundingBox::new(min_lat, max_lat, min_lon, max_lon).unwrap()
    }

    fn square() -> BoundingBox {
        bbox(10.0, 20.0, 10.0, 20.0)
    }

    fn definition(name: &str, min_lat: f64, max_lat: f64) -> FenceDefinition {
        FenceDefinition {
            name: name.to_string(),
            min_latitude: min_lat,
            max_latitude: max_lat,
            min_longitude: 0.0,
            max_longitude: 1.0,
        }
    }

    #[test]
    fn test_add_definitions_skips_bad_entries() {
        let registry = FenceRegistry::default();
        let defs = vec![
            definition("yard", 0.0, 1.0),
            definition("inverted", 1.0, 0.0),
            definition("yard", 2.0, 3.0),
            definition("dock", 2.0, 3.0),
        ];

        assert_eq!(registry.add_definitions(&defs), 2);
        let names: Vec<_> = registry.list().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["yard", "dock"]);
    }

    fn states(events: &FenceEvents) -> Vec<(&str, FenceState)> {
        events.iter().map(|e| (e.name.as_str(), e.state)).collect()
    }

    #[test]
    fn test_add_and_list() {
        let registry = FenceRegistry::default();
        registry.add("home", square()).unwrap();

        let fences = registry.list();
        assert_eq!(fences.len(), 1);
        assert_eq!(fences[0].name, "home");
        assert_eq!(fences[0].bbox, square());
        assert!(!fences[0].inside);
        assert!(!fences[0].dwelling);
    }

    #[test]
    fn test_duplicate_name_rejected_regardless_of_bbox() {
        let registry = FenceRegistry::default();
        registry.add("home", square()).unwrap();

        let err = registry.add("home", bbox(0.0, 1.0, 0.0, 1.0)).unwrap_err();
        assert_eq!(err, GeofenceError::DuplicateName("home".to_string()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("home").unwrap().bbox, square());
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let registry = FenceRegistry::default();
        assert_eq!(registry.remove("nope"), Err(GeofenceError::NotFound("nope".to_string())));
    }

    #[test]
    fn test_remove_keeps_order_and_index() {
        let registry = FenceRegistry::default();
        registry.add("a", square()).unwrap();
        registry.add("b", square()).unwrap();
        registry.add("c", square()).unwrap();

        registry.remove("a").unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["b", "c"]);

        // Index must still resolve after the shift
        assert!(registry.get("c").is_some());
        registry.remove("c").unwrap();
        assert!(registry.get("c").is_none());
        assert_eq!(registry.len(), 1);

        // Name can be reused after removal
        registry.add("a", square()).unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_removed_fence_not_evaluated() {
        let registry = FenceRegistry::default();
        let t0 = Instant::now();
        registry.add("home", square()).unwrap();
        registry.add("work", square()).unwrap();
        registry.remove("home").unwrap();

        let events = registry.evaluate_at(Position::new(15.0, 15.0), t0);
        assert_eq!(states(&events), vec![("work", FenceState::Entered)]);
    }

    #[test]
    fn test_evaluation_follows_insertion_order() {
        let registry = FenceRegistry::default();
        let t0 = Instant::now();
        registry.add("zulu", square()).unwrap();
        registry.add("alpha", square()).unwrap();
        registry.add("mike", bbox(0.0, 50.0, 0.0, 50.0)).unwrap();

        let events = registry.evaluate_at(Position::new(15.0, 15.0), t0);
        assert_eq!(
            states(&events),
            vec![
                ("zulu", FenceState::Entered),
                ("alpha", FenceState::Entered),
                ("mike", FenceState::Entered)
            ]
        );
    }

    #[test]
    fn test_reference_scenario() {
        let registry = FenceRegistry::new(Duration::from_secs(20));
        registry.add("square", square()).unwrap();
        let t0 = Instant::now();
        let inside = Position::new(15.0, 15.0);

        assert_eq!(states(&registry.evaluate_at(inside, t0)), vec![("square", FenceState::Entered)]);
        assert!(registry.evaluate_at(inside, t0 + Duration::from_secs(19)).is_empty());
        assert_eq!(
            states(&registry.evaluate_at(inside, t0 + Duration::from_secs(20))),
            vec![("square", FenceState::Dwell)]
        );

        let snapshot = registry.get("square").unwrap();
        assert!(snapshot.inside);
        assert!(snapshot.dwelling);

        assert_eq!(
            states(&registry.evaluate_at(Position::new(5.0, 5.0), t0 + Duration::from_secs(25))),
            vec![("square", FenceState::Exited)]
        );
        let snapshot = registry.get("square").unwrap();
        assert!(!snapshot.inside);
        assert!(!snapshot.dwelling);
    }

    #[test]
    fn test_threshold_zero_never_dwells() {
        let registry = FenceRegistry::new(Duration::ZERO);
        registry.add("square", square()).unwrap();
        let t0 = Instant::now();
        let inside = Position::new(15.0, 15.0);

        registry.evaluate_at(inside, t0);
        for s in [20, 60, 3600] {
            assert!(registry.evaluate_at(inside, t0 + Duration::from_secs(s)).is_empty());
        }
        assert!(!registry.get("square").unwrap().dwelling);
    }

    #[test]
    fn test_threshold_get_set() {
        let registry = FenceRegistry::default();
        assert_eq!(registry.dwell_threshold(), DEFAULT_DWELL_THRESHOLD);
        registry.set_dwell_threshold(Duration::from_secs(5));
        assert_eq!(registry.dwell_threshold(), Duration::from_secs(5));
    }

    #[test]
    fn test_concurrent_config_and_evaluation() {
        let registry = Arc::new(FenceRegistry::new(Duration::ZERO));
        registry.add("fixed", square()).unwrap();

        let writer = {
            let registry = registry.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    let name = format!("fence-{i}");
                    registry.add(&name, square()).unwrap();
                    registry.remove(&name).unwrap();
                }
            })
        };

        let mut entered = 0;
        let mut exited = 0;
        for i in 0..500 {
            let point = if i % 2 == 0 { Position::new(15.0, 15.0) } else { Position::new(0.0, 0.0) };
            for event in registry.evaluate(point) {
                if event.name == "fixed" {
                    match event.state {
                        FenceState::Entered => entered += 1,
                        FenceState::Exited => exited += 1,
                        FenceState::Dwell => panic!("dwell disabled"),
                    }
                }
            }
        }
        writer.join().unwrap();

        assert_eq!(entered, 250);
        assert_eq!(exited, 250);
        assert_eq!(registry.len(), 1);
    }
}
