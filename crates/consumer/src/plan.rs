//! Update plans: the ordered blob sequence behind one `update` call.

use std::path::PathBuf;

/// Whether a blob reinitializes state or amends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    /// Full reinitialization blob.
    Snapshot,
    /// Incremental update blob.
    Delta,
}

/// One blob transition: a file plus the version edge it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionBlob {
    /// Snapshot or delta.
    pub kind: BlobKind,
    /// Location of the blob file.
    pub path: PathBuf,
    /// Version this transition starts from (0 for snapshots).
    pub from_version: u64,
    /// Version this transition produces.
    pub to_version: u64,
}

impl TransitionBlob {
    /// A snapshot transition to `to_version`.
    pub fn snapshot(path: impl Into<PathBuf>, to_version: u64) -> Self {
        TransitionBlob {
            kind: BlobKind::Snapshot,
            path: path.into(),
            from_version: 0,
            to_version,
        }
    }

    /// A delta transition from `from_version` to `to_version`.
    pub fn delta(path: impl Into<PathBuf>, from_version: u64, to_version: u64) -> Self {
        TransitionBlob {
            kind: BlobKind::Delta,
            path: path.into(),
            from_version,
            to_version,
        }
    }

    /// Whether this is a snapshot transition.
    pub fn is_snapshot(&self) -> bool {
        self.kind == BlobKind::Snapshot
    }

    /// The identity used by the failed-transition tracker.
    pub fn identity(&self) -> BlobIdentity {
        BlobIdentity {
            kind: self.kind,
            from_version: self.from_version,
            to_version: self.to_version,
        }
    }
}

/// Identity of a blob for failure tracking: the version edge, not the
/// file path — a re-fetched copy of a failing transition still fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobIdentity {
    /// Snapshot or delta.
    pub kind: BlobKind,
    /// Version the transition starts from.
    pub from_version: u64,
    /// Version the transition produces.
    pub to_version: u64,
}

/// An ordered sequence of transitions driving one `update` call.
///
/// A plan is a *snapshot plan* iff it begins with a snapshot transition;
/// every following transition, and every transition of a non-snapshot
/// plan, must be a delta.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    transitions: Vec<TransitionBlob>,
    destination_version: u64,
}

impl UpdatePlan {
    /// A plan that reinitializes from `snapshot` then applies `deltas`.
    pub fn snapshot_plan(
        snapshot: TransitionBlob,
        deltas: Vec<TransitionBlob>,
        destination_version: u64,
    ) -> Self {
        debug_assert!(snapshot.is_snapshot());
        debug_assert!(deltas.iter().all(|d| !d.is_snapshot()));
        let mut transitions = Vec::with_capacity(1 + deltas.len());
        transitions.push(snapshot);
        transitions.extend(deltas);
        UpdatePlan {
            transitions,
            destination_version,
        }
    }

    /// A delta-only plan.
    pub fn delta_plan(deltas: Vec<TransitionBlob>, destination_version: u64) -> Self {
        debug_assert!(deltas.iter().all(|d| !d.is_snapshot()));
        UpdatePlan {
            transitions: deltas,
            destination_version,
        }
    }

    /// The transitions in application order.
    pub fn transitions(&self) -> &[TransitionBlob] {
        &self.transitions
    }

    /// Whether the plan begins with a snapshot.
    pub fn is_snapshot_plan(&self) -> bool {
        self.transitions.first().map(TransitionBlob::is_snapshot) == Some(true)
    }

    /// The leading snapshot transition, if this is a snapshot plan.
    pub fn snapshot_transition(&self) -> Option<&TransitionBlob> {
        self.transitions.first().filter(|t| t.is_snapshot())
    }

    /// The delta transitions following the snapshot (or all transitions of
    /// a delta-only plan).
    pub fn delta_transitions(&self) -> &[TransitionBlob] {
        if self.is_snapshot_plan() {
            &self.transitions[1..]
        } else {
            &self.transitions
        }
    }

    /// The version this plan lands on.
    pub fn destination_version(&self) -> u64 {
        self.destination_version
    }

    /// Whether the plan has no transitions.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_classification() {
        let snapshot = TransitionBlob::snapshot("/tmp/s", 5);
        let delta = TransitionBlob::delta("/tmp/d", 5, 6);

        let plan = UpdatePlan::snapshot_plan(snapshot, vec![delta.clone()], 6);
        assert!(plan.is_snapshot_plan());
        assert_eq!(plan.transitions().len(), 2);
        assert_eq!(plan.delta_transitions(), &[delta.clone()]);
        assert_eq!(plan.destination_version(), 6);

        let delta_plan = UpdatePlan::delta_plan(vec![delta.clone()], 6);
        assert!(!delta_plan.is_snapshot_plan());
        assert!(delta_plan.snapshot_transition().is_none());
        assert_eq!(delta_plan.delta_transitions(), &[delta]);
    }

    #[test]
    fn test_identity_ignores_path() {
        let a = TransitionBlob::delta("/tmp/a", 1, 2);
        let b = TransitionBlob::delta("/cache/b", 1, 2);
        assert_eq!(a.identity(), b.identity());

        let snapshot = TransitionBlob::snapshot("/tmp/a", 2);
        assert_ne!(a.identity(), snapshot.identity());
    }
}
