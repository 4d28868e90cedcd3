//! Consumer update driver for Shale
//!
//! The pieces that sit between blob storage and the read-state engine:
//! - Update plans: an ordered snapshot?+deltas sequence with a destination
//!   version
//! - Failed-transition tracking and the double-snapshot gate
//! - Refresh listeners, invoked synchronously on the driver thread
//! - Read-API generations published by pointer swap, with an optional
//!   proxy indirection for long-lived handles, a historical-state chain,
//!   and a stale-reference detector

#![warn(missing_docs)]
#![warn(clippy::all)]

mod api;
mod consumer;
mod failed;
mod listener;
mod plan;
mod stale;

pub use api::{HistoricalDataAccess, ProxyDataAccess, ReadApi, SharedStateEngine};
pub use consumer::{
    ConsumerConfig, DoubleSnapshotConfig, ObjectLongevityConfig, ShaleConsumer, VERSION_NONE,
};
pub use failed::FailedTransitionTracker;
pub use listener::RefreshListener;
pub use plan::{BlobIdentity, BlobKind, TransitionBlob, UpdatePlan};
pub use stale::StaleReferenceDetector;
