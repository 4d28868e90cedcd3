//! Refresh listeners.
//!
//! Callbacks run synchronously on the driver thread, in registration
//! order. A listener returning an error fails the transition it ran in:
//! the plan's blobs are marked failed and the error propagates to the
//! `update` caller, because a half-run listener may have left derived
//! state (indexes, caches) inconsistent with the engine.

use crate::api::{ReadApi, SharedStateEngine};
use crate::plan::TransitionBlob;
use shale_core::ShaleResult;
use std::sync::Arc;

/// Observer of consumer refresh lifecycle events. All methods default to
/// no-ops so implementations override only what they watch.
pub trait RefreshListener: Send + Sync {
    /// A blob was read into the engine (fires per transition, snapshot and
    /// delta alike).
    fn blob_loaded(&self, _blob: &TransitionBlob) -> ShaleResult<()> {
        Ok(())
    }

    /// A snapshot transition finished and its API generation is live.
    /// Fires once per applied snapshot, before any trailing deltas.
    fn snapshot_applied(
        &self,
        _api: &Arc<ReadApi>,
        _engine: &SharedStateEngine,
        _to_version: u64,
    ) -> ShaleResult<()> {
        Ok(())
    }

    /// A snapshot plan completed at its destination version.
    fn snapshot_update_occurred(
        &self,
        _api: &Arc<ReadApi>,
        _engine: &SharedStateEngine,
        _destination_version: u64,
    ) -> ShaleResult<()> {
        Ok(())
    }

    /// A delta transition completed at `destination_version`.
    fn delta_update_occurred(
        &self,
        _api: &Arc<ReadApi>,
        _engine: &SharedStateEngine,
        _destination_version: u64,
    ) -> ShaleResult<()> {
        Ok(())
    }
}
