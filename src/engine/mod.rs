//! In-process relational storage engine.
//!
//! An [`Engine`] owns the catalog, heaps, transaction status and lock table.
//! Work is done through [`Backend`]s: one per session, each bound to a single
//! thread and implementing [`crate::host::Host`] for the statement it is
//! running.

mod backend;
pub mod catalog;
pub mod error;
pub mod heap;
pub mod lock;
pub mod redb;
pub mod snapshot;
pub mod types;
pub mod xact;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use catalog::Catalog;
use heap::{Heap, SharedHeap};
use lock::LockManager;
use xact::TransactionManager;

pub use backend::{Backend, CancelHandle};
pub use catalog::{ColumnDef, RelationInfo};
pub use error::HostError;
pub use heap::VacuumStats;
pub use lock::{LockMode, LockTag};
pub use snapshot::Snapshot;
pub use types::{
    AttrNumber, Attribute, Datum, HeapTuple, ItemPointer, Oid, ScanKey, Strategy, TupleDesc,
    TupleSlot,
};
pub use xact::Xid;

use self::redb::RedbStorage;

/// Finished transactions between automatic vacuum passes.
const AUTOVACUUM_INTERVAL: u64 = 1000;

pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) catalog: RwLock<Catalog>,
    pub(crate) heaps: RwLock<HashMap<Oid, SharedHeap>>,
    pub(crate) xacts: TransactionManager,
    pub(crate) locks: LockManager,
    pub(crate) storage: Option<RedbStorage>,
    next_backend: AtomicU64,
    finished_xacts: AtomicU64,
}

impl Shared {
    fn new(
        config: EngineConfig,
        catalog: Catalog,
        heaps: HashMap<Oid, SharedHeap>,
        storage: Option<RedbStorage>,
    ) -> Self {
        Self {
            config,
            catalog: RwLock::new(catalog),
            heaps: RwLock::new(heaps),
            xacts: TransactionManager::new(),
            locks: LockManager::new(),
            storage,
            next_backend: AtomicU64::new(1),
            finished_xacts: AtomicU64::new(0),
        }
    }

    /// Count a finished transaction and vacuum every `AUTOVACUUM_INTERVAL`.
    pub(crate) fn transaction_finished(&self) {
        let n = self.finished_xacts.fetch_add(1, Ordering::Relaxed) + 1;
        if n % AUTOVACUUM_INTERVAL == 0 {
            self.vacuum();
        }
    }

    /// Drop tuple versions nobody can see and forget transaction outcomes
    /// nothing refers to any more.
    pub(crate) fn vacuum(&self) -> VacuumStats {
        let horizon = self.xacts.horizon();
        let heaps: Vec<SharedHeap> = self.heaps.read().values().cloned().collect();
        let mut stats = VacuumStats::default();
        for heap in heaps {
            let pass = heap.write().vacuum(horizon, &|xid| self.xacts.status(xid));
            stats.removed += pass.removed;
            stats.frozen += pass.frozen;
        }
        stats.xids_pruned = self.xacts.prune(horizon);
        debug!(
            %horizon,
            removed = stats.removed,
            frozen = stats.frozen,
            xids_pruned = stats.xids_pruned,
            "vacuum"
        );
        stats
    }
}

/// Handle to a running engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Start an engine. When `config.db_path` is set, the catalog and
    /// committed rows are loaded from (and later written to) that file.
    pub fn open(config: EngineConfig) -> Result<Self, HostError> {
        let mut catalog = Catalog::new();
        let mut heaps: HashMap<Oid, SharedHeap> = HashMap::new();

        let storage = match &config.db_path {
            Some(path) => {
                let storage = RedbStorage::open(path)?;
                let state = storage.load()?;
                for (name, oid) in &state.namespaces {
                    catalog.restore_namespace(name, *oid);
                }
                for info in state.relations {
                    heaps.insert(info.oid, Arc::new(RwLock::new(Heap::new(info.primary_key))));
                    catalog.restore_relation(info);
                }
                let mut rows = 0usize;
                for (relid, tid, values) in state.rows {
                    match heaps.get(&relid) {
                        Some(heap) => {
                            heap.write().restore(tid, values);
                            rows += 1;
                        }
                        None => warn!(relid, %tid, "skipping row of unknown relation"),
                    }
                }
                info!(path = %path.display(), relations = heaps.len(), rows, "loaded database");
                Some(storage)
            }
            None => None,
        };

        Ok(Self {
            shared: Arc::new(Shared::new(config, catalog, heaps, storage)),
        })
    }

    /// A purely in-memory engine with default settings.
    pub fn in_memory() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// An in-memory engine; `db_path` in `config` is ignored.
    pub fn with_config(config: EngineConfig) -> Self {
        let config = EngineConfig {
            db_path: None,
            ..config
        };
        Self {
            shared: Arc::new(Shared::new(config, Catalog::new(), HashMap::new(), None)),
        }
    }

    /// Reclaim dead tuple versions and forget settled transaction ids. Also
    /// runs on its own after every `AUTOVACUUM_INTERVAL` finished transactions.
    pub fn vacuum(&self) -> VacuumStats {
        self.shared.vacuum()
    }

    /// Transaction outcomes the engine still remembers.
    pub fn tracked_transactions(&self) -> usize {
        self.shared.xacts.tracked()
    }

    /// Tuple versions stored in `relid`'s heap, dead or alive.
    pub fn stored_versions(&self, relid: Oid) -> Option<usize> {
        self.shared.heaps.read().get(&relid).map(|h| h.read().stored())
    }

    /// Open a new session.
    pub fn connect(&self) -> Backend {
        let id = self.shared.next_backend.fetch_add(1, Ordering::Relaxed);
        Backend::new(id, Arc::clone(&self.shared))
    }
}
