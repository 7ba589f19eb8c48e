use std::sync::Arc;

use crate::engine::catalog::RelationInfo;
use crate::engine::heap::{HeapScan, SharedHeap};
use crate::engine::{
    HeapTuple, HostError, ItemPointer, LockMode, Oid, ScanKey, Snapshot, TupleDesc, TupleSlot,
};

/// An open relation. Only a `Host` can make one, and it must be handed back to
/// `Host::close_relation` with the mode it was opened with.
#[derive(Debug)]
pub struct Relation {
    pub(crate) info: Arc<RelationInfo>,
    pub(crate) heap: SharedHeap,
}

impl Relation {
    pub fn oid(&self) -> Oid {
        self.info.oid
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.info.desc
    }
}

/// Table-access primitives of the database the key-value functions run in.
///
/// Every call happens inside the caller's current statement; snapshots and
/// writes belong to the caller's transaction.
pub trait Host {
    /// Look up a schema by name.
    fn namespace_oid(&self, name: &str) -> Option<Oid>;

    /// Look up a table by name inside a schema.
    fn relation_oid(&self, name: &str, namespace: Oid) -> Option<Oid>;

    /// Lock the relation in `mode`, then open it. Fails if it no longer exists.
    fn open_relation(&self, relid: Oid, mode: LockMode) -> Result<Relation, HostError>;

    /// Close the relation and release the lock taken by `open_relation`.
    fn close_relation(&self, relation: Relation, mode: LockMode);

    /// The snapshot of the current statement.
    fn active_snapshot(&self) -> Result<Snapshot, HostError>;

    /// A snapshot that also sees writes of the current statement.
    fn self_snapshot(&self) -> Result<Snapshot, HostError>;

    fn begin_scan(
        &self,
        relation: &Relation,
        snapshot: Snapshot,
        keys: Vec<ScanKey>,
    ) -> Result<HeapScan, HostError>;

    /// Next visible row satisfying every scan key, in heap order.
    fn scan_next(&self, scan: &mut HeapScan) -> Result<Option<HeapTuple>, HostError>;

    fn end_scan(&self, scan: HeapScan);

    /// Insert the slot's tuple, maintaining the primary key.
    fn insert_tuple(
        &self,
        relation: &Relation,
        slot: &mut TupleSlot<'_>,
    ) -> Result<ItemPointer, HostError>;

    /// Delete the tuple version at `tid` on behalf of the current statement.
    fn delete_tuple(
        &self,
        relation: &Relation,
        tid: ItemPointer,
        snapshot: &Snapshot,
    ) -> Result<(), HostError>;

    /// Cancellation safe point.
    fn check_interrupts(&self) -> Result<(), HostError>;
}
