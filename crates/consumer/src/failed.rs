//! Failed-transition tracking.
//!
//! Blob identities that previously failed to apply. Under double-snapshot
//! recovery an update plan intersecting this set is rejected up front —
//! the announcement of the next state will route around the bad edge —
//! rather than burning a load attempt on bytes that already failed.

use crate::plan::{BlobIdentity, TransitionBlob, UpdatePlan};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// The set of blob identities known to have failed.
#[derive(Default)]
pub struct FailedTransitionTracker {
    failed: Mutex<FxHashSet<BlobIdentity>>,
}

impl FailedTransitionTracker {
    /// An empty tracker.
    pub fn new() -> Self {
        FailedTransitionTracker::default()
    }

    /// Whether any transition of `plan` has previously failed.
    pub fn any_failed(&self, plan: &UpdatePlan) -> bool {
        let failed = self.failed.lock();
        plan.transitions()
            .iter()
            .any(|blob| failed.contains(&blob.identity()))
    }

    /// Whether the specific blob has previously failed.
    pub fn is_failed(&self, blob: &TransitionBlob) -> bool {
        self.failed.lock().contains(&blob.identity())
    }

    /// Record a single failed transition.
    pub fn mark_failed(&self, blob: &TransitionBlob) {
        self.failed.lock().insert(blob.identity());
    }

    /// Record every transition of `plan` as failed.
    pub fn mark_plan_failed(&self, plan: &UpdatePlan) {
        let mut failed = self.failed.lock();
        for blob in plan.transitions() {
            failed.insert(blob.identity());
        }
    }

    /// Forget all recorded failures.
    pub fn clear(&self) {
        self.failed.lock().clear();
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.failed.lock().len()
    }

    /// Whether no failures are recorded.
    pub fn is_empty(&self) -> bool {
        self.failed.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_query() {
        let tracker = FailedTransitionTracker::new();
        let snapshot = TransitionBlob::snapshot("/tmp/s", 5);
        let delta = TransitionBlob::delta("/tmp/d", 5, 6);
        let plan = UpdatePlan::snapshot_plan(snapshot.clone(), vec![delta.clone()], 6);

        assert!(!tracker.any_failed(&plan));
        tracker.mark_failed(&delta);
        assert!(tracker.any_failed(&plan));
        assert!(tracker.is_failed(&delta));
        assert!(!tracker.is_failed(&snapshot));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_mark_plan_marks_every_blob() {
        let tracker = FailedTransitionTracker::new();
        let plan = UpdatePlan::snapshot_plan(
            TransitionBlob::snapshot("/tmp/s", 5),
            vec![
                TransitionBlob::delta("/tmp/d1", 5, 6),
                TransitionBlob::delta("/tmp/d2", 6, 7),
            ],
            7,
        );

        tracker.mark_plan_failed(&plan);
        assert_eq!(tracker.len(), 3);
        for blob in plan.transitions() {
            assert!(tracker.is_failed(blob));
        }

        tracker.clear();
        assert!(tracker.is_empty());
    }
}
