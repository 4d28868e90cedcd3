//! The consumer update driver.
//!
//! Applies an update plan to the engine:
//!
//! - a **snapshot plan** loads the snapshot into a *fresh* engine,
//!   publishes it by pointer swap, applies any trailing deltas, then
//!   notifies `snapshot_update_occurred`;
//! - a **delta-only plan** applies each delta to the live engine in place
//!   and notifies `delta_update_occurred` per transition.
//!
//! Failure scope follows the plan kind: a failing snapshot plan marks
//! every blob in the plan, a failing delta plan marks the offending blob.
//! A failure after the live engine began mutating leaves it poisoned;
//! delta-only updates are refused until a snapshot plan succeeds (the
//! fresh engine replaces the poisoned one wholesale). The double-snapshot
//! gate rejects plans intersecting the failed-transition tracker before
//! any I/O.

use crate::api::{HistoricalDataAccess, ProxyDataAccess, ReadApi, SharedStateEngine};
use crate::failed::FailedTransitionTracker;
use crate::listener::RefreshListener;
use crate::plan::{TransitionBlob, UpdatePlan};
use crate::stale::StaleReferenceDetector;
use parking_lot::{Mutex, RwLock};
use shale_core::{FilterConfig, ShaleError, ShaleResult};
use shale_engine::{BlobReader, ReadStateEngine};
use shale_memory::{BlobInput, MemoryMode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{info, warn};

/// Sentinel for "no version loaded yet".
pub const VERSION_NONE: u64 = 0;

/// Whether a consumer stuck on a failing delta chain may recover by
/// re-snapshotting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleSnapshotConfig {
    /// `true` to permit re-snapshot recovery (and therefore to reject
    /// plans with known-failing transitions up front).
    pub allow: bool,
}

impl Default for DoubleSnapshotConfig {
    fn default() -> Self {
        DoubleSnapshotConfig { allow: true }
    }
}

/// Whether read APIs go through the proxy indirection so long-lived
/// handles keep working against their own generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectLongevityConfig {
    /// `true` to insert [`ProxyDataAccess`] between APIs and the engine.
    pub enable_long_lived_object_support: bool,
}

/// Consumer configuration.
#[derive(Debug, Clone, Default)]
pub struct ConsumerConfig {
    /// How snapshot payloads become resident.
    pub memory_mode: MemoryMode,
    /// Double-snapshot recovery gate.
    pub double_snapshot: DoubleSnapshotConfig,
    /// Long-lived object support.
    pub object_longevity: ObjectLongevityConfig,
    /// Types and fields to retain during snapshot ingestion.
    pub filter: FilterConfig,
}

/// The update driver plus the consumer-visible state it maintains.
pub struct ShaleConsumer {
    config: ConsumerConfig,
    current_engine: RwLock<SharedStateEngine>,
    current_api: RwLock<Option<Arc<ReadApi>>>,
    current_version: AtomicU64,
    api_generation: AtomicU64,
    failed: FailedTransitionTracker,
    stale: StaleReferenceDetector,
    listeners: RwLock<Vec<Arc<dyn RefreshListener>>>,
    prior_historical: Mutex<Option<Weak<HistoricalDataAccess>>>,
}

impl ShaleConsumer {
    /// A consumer with no data loaded.
    pub fn new(config: ConsumerConfig) -> Self {
        ShaleConsumer {
            config,
            current_engine: RwLock::new(Arc::new(RwLock::new(ReadStateEngine::new()))),
            current_api: RwLock::new(None),
            current_version: AtomicU64::new(VERSION_NONE),
            api_generation: AtomicU64::new(0),
            failed: FailedTransitionTracker::new(),
            stale: StaleReferenceDetector::new(),
            listeners: RwLock::new(Vec::new()),
            prior_historical: Mutex::new(None),
        }
    }

    /// Register a refresh listener for all future updates.
    pub fn register_listener(&self, listener: Arc<dyn RefreshListener>) {
        self.listeners.write().push(listener);
    }

    /// The version of the most recently applied transition, or
    /// [`VERSION_NONE`].
    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::Acquire)
    }

    /// The current read-API generation, once a snapshot has been applied.
    pub fn read_api(&self) -> Option<Arc<ReadApi>> {
        self.current_api.read().clone()
    }

    /// The live state engine generation.
    pub fn state_engine(&self) -> SharedStateEngine {
        Arc::clone(&self.current_engine.read())
    }

    /// The failed-transition tracker.
    pub fn failed_transitions(&self) -> &FailedTransitionTracker {
        &self.failed
    }

    /// The stale-reference detector.
    pub fn stale_reference_detector(&self) -> &StaleReferenceDetector {
        &self.stale
    }

    /// The most recent historical chain link, while any superseded handle
    /// keeps it alive.
    pub fn historical_access(&self) -> Option<Arc<HistoricalDataAccess>> {
        self.prior_historical.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Apply `plan` using the registered listeners.
    pub fn update(&self, plan: &UpdatePlan) -> ShaleResult<()> {
        self.update_with_listeners(plan, &[])
    }

    /// Apply `plan`, notifying the registered listeners plus `extra`.
    pub fn update_with_listeners(
        &self,
        plan: &UpdatePlan,
        extra: &[Arc<dyn RefreshListener>],
    ) -> ShaleResult<()> {
        if self.config.double_snapshot.allow && self.failed.any_failed(plan) {
            return Err(ShaleError::KnownFailingTransition {
                version: plan.destination_version(),
            });
        }

        let listeners: Vec<Arc<dyn RefreshListener>> = self
            .listeners
            .read()
            .iter()
            .cloned()
            .chain(extra.iter().cloned())
            .collect();

        if plan.is_snapshot_plan() {
            self.apply_snapshot_plan(plan, &listeners)
        } else {
            self.apply_delta_only_plan(plan, &listeners)
        }
    }

    fn apply_snapshot_plan(
        &self,
        plan: &UpdatePlan,
        listeners: &[Arc<dyn RefreshListener>],
    ) -> ShaleResult<()> {
        if let Err(error) = self.run_snapshot_plan(plan, listeners) {
            self.failed.mark_plan_failed(plan);
            warn!(
                destination = plan.destination_version(),
                %error,
                "snapshot plan failed; all plan transitions marked"
            );
            return Err(error);
        }
        Ok(())
    }

    fn run_snapshot_plan(
        &self,
        plan: &UpdatePlan,
        listeners: &[Arc<dyn RefreshListener>],
    ) -> ShaleResult<()> {
        let Some(snapshot) = plan.snapshot_transition() else {
            return Ok(());
        };
        self.apply_snapshot_transition(snapshot, listeners)?;

        for blob in plan.delta_transitions() {
            self.apply_delta_transition(blob, listeners, false)?;
        }

        if let Some(api) = self.read_api() {
            let engine = self.state_engine();
            for listener in listeners {
                listener
                    .snapshot_update_occurred(&api, &engine, plan.destination_version())
                    .map_err(listener_failure)?;
            }
        }
        Ok(())
    }

    fn apply_snapshot_transition(
        &self,
        blob: &TransitionBlob,
        listeners: &[Arc<dyn RefreshListener>],
    ) -> ShaleResult<()> {
        // Load into a fresh engine; the live generation stays untouched
        // (and unpoisoned) if anything here fails.
        let mut fresh_engine = ReadStateEngine::new();
        let mut input = BlobInput::open(&blob.path, self.config.memory_mode)?;
        BlobReader::new(&mut fresh_engine).read_snapshot(&mut input, &self.config.filter)?;
        let fresh: SharedStateEngine = Arc::new(RwLock::new(fresh_engine));

        let prior_version = self.current_version.load(Ordering::Acquire);
        let old_api = self.read_api();

        // Publish the new generation by pointer swap.
        let old_engine = {
            let mut guard = self.current_engine.write();
            std::mem::replace(&mut *guard, Arc::clone(&fresh))
        };
        self.current_version.store(blob.to_version, Ordering::Release);

        for listener in listeners {
            listener.blob_loaded(blob).map_err(listener_failure)?;
        }

        let generation = self.api_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let api = if self.config.object_longevity.enable_long_lived_object_support {
            let proxy = Arc::new(ProxyDataAccess::new(Arc::clone(&fresh)));
            Arc::new(ReadApi::proxied(generation, proxy))
        } else {
            Arc::new(ReadApi::direct(generation, Arc::clone(&fresh)))
        };
        *self.current_api.write() = Some(Arc::clone(&api));
        self.stale.new_api_handle(&api);

        if prior_version != VERSION_NONE {
            self.wire_historical_chain(prior_version, old_engine, old_api.as_ref());
        }

        for listener in listeners {
            listener
                .snapshot_applied(&api, &fresh, blob.to_version)
                .map_err(listener_failure)?;
        }
        info!(version = blob.to_version, generation, "snapshot applied");
        Ok(())
    }

    /// Wrap the superseded generation and link it behind its predecessor.
    ///
    /// The chain is pinned only by superseded API handles (through their
    /// proxies); the driver keeps a weak reference, so generations nobody
    /// holds unwind immediately.
    fn wire_historical_chain(
        &self,
        version: u64,
        engine: SharedStateEngine,
        old_api: Option<&Arc<ReadApi>>,
    ) {
        let historical = Arc::new(HistoricalDataAccess::new(version, engine));
        if let Some(proxy) = old_api.and_then(|api| api.proxy()) {
            proxy.attach_historical(Arc::clone(&historical));
        }
        let mut prior = self.prior_historical.lock();
        if let Some(previous) = prior.as_ref().and_then(Weak::upgrade) {
            previous.set_next(Arc::clone(&historical));
        }
        *prior = Some(Arc::downgrade(&historical));
    }

    fn apply_delta_only_plan(
        &self,
        plan: &UpdatePlan,
        listeners: &[Arc<dyn RefreshListener>],
    ) -> ShaleResult<()> {
        for blob in plan.delta_transitions() {
            if let Err(error) = self.apply_delta_transition(blob, listeners, true) {
                self.failed.mark_failed(blob);
                warn!(
                    from = blob.from_version,
                    to = blob.to_version,
                    %error,
                    "delta transition failed"
                );
                return Err(error);
            }
        }
        Ok(())
    }

    fn apply_delta_transition(
        &self,
        blob: &TransitionBlob,
        listeners: &[Arc<dyn RefreshListener>],
        notify_delta_listeners: bool,
    ) -> ShaleResult<()> {
        let engine = self.state_engine();
        {
            let mut guard = engine.write();
            if guard.is_poisoned() {
                return Err(ShaleError::EnginePoisoned);
            }
            let mut input = BlobInput::open(&blob.path, self.config.memory_mode)?;
            BlobReader::new(&mut guard).apply_delta(&mut input)?;
        }
        self.current_version.store(blob.to_version, Ordering::Release);

        for listener in listeners {
            listener.blob_loaded(blob).map_err(listener_failure)?;
        }
        if notify_delta_listeners {
            if let Some(api) = self.read_api() {
                for listener in listeners {
                    listener
                        .delta_update_occurred(&api, &engine, blob.to_version)
                        .map_err(listener_failure)?;
                }
            }
        }
        info!(version = blob.to_version, "delta applied");
        Ok(())
    }
}

/// Listener errors fail the transition; flatten foreign errors into the
/// listener-failure variant so the caller sees what happened and the
/// tracker records the plan.
fn listener_failure(error: ShaleError) -> ShaleError {
    match error {
        already @ ShaleError::ListenerFailure { .. } => already,
        other => ShaleError::ListenerFailure {
            reason: other.to_string(),
        },
    }
}
