//! Stale-reference detection.
//!
//! Every published read API is observed through a weak reference. A handle
//! that stays strongly reachable after its generation was superseded is a
//! *stale reference*: user code pinning memory that two generations of
//! updates have already paid to replace.

use crate::api::ReadApi;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::warn;

/// Observes read-API generations and counts superseded ones still alive.
#[derive(Default)]
pub struct StaleReferenceDetector {
    handles: Mutex<Vec<(u64, Weak<ReadApi>)>>,
}

impl StaleReferenceDetector {
    /// An empty detector.
    pub fn new() -> Self {
        StaleReferenceDetector::default()
    }

    /// Observe a newly published API generation.
    pub fn new_api_handle(&self, api: &Arc<ReadApi>) {
        let mut handles = self.handles.lock();
        handles.retain(|(_, weak)| weak.strong_count() > 0);
        handles.push((api.generation(), Arc::downgrade(api)));

        let stale = handles
            .iter()
            .filter(|(generation, weak)| {
                *generation < api.generation() && weak.strong_count() > 0
            })
            .count();
        if stale > 0 {
            warn!(
                stale,
                current_generation = api.generation(),
                "superseded read-API handles are still reachable"
            );
        }
    }

    /// Number of superseded generations still strongly held.
    pub fn stale_handle_count(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|(_, weak)| weak.strong_count() > 0);
        let current = handles
            .iter()
            .map(|(generation, _)| *generation)
            .max()
            .unwrap_or(0);
        handles
            .iter()
            .filter(|(generation, _)| *generation < current)
            .count()
    }

    /// Number of generations currently tracked (alive, any age).
    pub fn tracked_handles(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|(_, weak)| weak.strong_count() > 0);
        handles.len()
    }
}
