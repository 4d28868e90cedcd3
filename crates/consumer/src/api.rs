//! Read-API generations, proxy indirection, and the historical chain.
//!
//! Each successful snapshot publishes a fresh [`ReadApi`] generation via a
//! pointer swap; readers clone the `Arc` at the start of a read and drop
//! it at the end, so a superseded generation's teardown is deferred until
//! the last reader departs.
//!
//! With long-lived object support, the API reaches its engine through a
//! [`ProxyDataAccess`]: a superseded generation's proxy keeps its old
//! engine (and the historical access wrapping it) alive for as long as a
//! handle to that generation survives. The driver itself holds only a weak
//! back-reference to the chain, so dropped generations become collectible.

use parking_lot::RwLock;
use shale_engine::ReadStateEngine;
use std::sync::Arc;

/// A state engine shared between the driver and reader generations.
pub type SharedStateEngine = Arc<RwLock<ReadStateEngine>>;

/// Re-targetable indirection between a read API and its engine.
pub struct ProxyDataAccess {
    target: RwLock<SharedStateEngine>,
    historical: RwLock<Option<Arc<HistoricalDataAccess>>>,
}

impl ProxyDataAccess {
    pub(crate) fn new(engine: SharedStateEngine) -> Self {
        ProxyDataAccess {
            target: RwLock::new(engine),
            historical: RwLock::new(None),
        }
    }

    /// The engine this proxy currently resolves to.
    pub fn target(&self) -> SharedStateEngine {
        Arc::clone(&self.target.read())
    }

    /// Pin the historical access wrapping this proxy's superseded engine,
    /// keeping the chain link alive for as long as the proxy's generation
    /// has live handles.
    pub(crate) fn attach_historical(&self, historical: Arc<HistoricalDataAccess>) {
        *self.historical.write() = Some(historical);
    }

    /// The historical access attached at supersession, if any.
    pub fn historical(&self) -> Option<Arc<HistoricalDataAccess>> {
        self.historical.read().clone()
    }
}

enum DataAccess {
    Direct(SharedStateEngine),
    Proxy(Arc<ProxyDataAccess>),
}

/// One generation of the consumer's read API.
pub struct ReadApi {
    generation: u64,
    access: DataAccess,
}

impl ReadApi {
    pub(crate) fn direct(generation: u64, engine: SharedStateEngine) -> Self {
        ReadApi {
            generation,
            access: DataAccess::Direct(engine),
        }
    }

    pub(crate) fn proxied(generation: u64, proxy: Arc<ProxyDataAccess>) -> Self {
        ReadApi {
            generation,
            access: DataAccess::Proxy(proxy),
        }
    }

    /// Monotonic generation counter; newer generations supersede older.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The engine this API reads.
    pub fn engine(&self) -> SharedStateEngine {
        match &self.access {
            DataAccess::Direct(engine) => Arc::clone(engine),
            DataAccess::Proxy(proxy) => proxy.target(),
        }
    }

    /// Whether this API goes through the long-lived-object proxy.
    pub fn is_long_lived(&self) -> bool {
        matches!(self.access, DataAccess::Proxy(_))
    }

    /// The proxy indirection, when long-lived object support is on.
    pub fn proxy(&self) -> Option<&Arc<ProxyDataAccess>> {
        match &self.access {
            DataAccess::Proxy(proxy) => Some(proxy),
            DataAccess::Direct(_) => None,
        }
    }
}

/// A superseded generation in the historical chain.
///
/// Generations link forward (`next`) with strong references held by their
/// predecessors' owners, while the driver holds only a weak reference to
/// the most recent link — once user code drops the last handle to an old
/// generation, its chain suffix unwinds.
pub struct HistoricalDataAccess {
    version: u64,
    engine: SharedStateEngine,
    next: RwLock<Option<Arc<HistoricalDataAccess>>>,
}

impl HistoricalDataAccess {
    pub(crate) fn new(version: u64, engine: SharedStateEngine) -> Self {
        HistoricalDataAccess {
            version,
            engine,
            next: RwLock::new(None),
        }
    }

    /// The version this generation served.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The superseded engine.
    pub fn engine(&self) -> SharedStateEngine {
        Arc::clone(&self.engine)
    }

    /// The generation that superseded this one, if still reachable.
    pub fn next(&self) -> Option<Arc<HistoricalDataAccess>> {
        self.next.read().clone()
    }

    pub(crate) fn set_next(&self, next: Arc<HistoricalDataAccess>) {
        *self.next.write() = Some(next);
    }
}
