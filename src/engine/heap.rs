//! Unordered tuple storage for one relation.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::engine::error::HostError;
use crate::engine::snapshot::{Snapshot, TupleHeader};
use crate::engine::types::{AttrNumber, Datum, HeapTuple, ItemPointer, Oid, ScanKey};
use crate::engine::xact::{CommandId, XactStatus, Xid};

#[derive(Debug, Clone)]
struct HeapItem {
    header: TupleHeader,
    values: Vec<Option<Datum>>,
}

/// What a primary-key probe found for a candidate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyProbe {
    /// No live version holds the key.
    Free,
    /// A live version holds the key.
    Taken,
    /// Undecided until this transaction finishes.
    WaitFor(Xid),
}

/// Outcome of trying to stamp a deleter on a tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAttempt {
    Deleted,
    WaitFor(Xid),
}

/// What one vacuum pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VacuumStats {
    /// Versions no snapshot can see any more.
    pub removed: usize,
    /// Versions whose inserter was replaced by `Xid::FROZEN`.
    pub frozen: usize,
    /// Transaction outcomes forgotten afterwards.
    pub xids_pruned: usize,
}

/// Append-only array of tuple versions plus an optional primary-key index.
///
/// Item pointers are positions in the array and stay stable for the life of
/// the heap; vacuum empties slots but never reuses them. The index maps key
/// bytes to every version still stored with that key; liveness is decided at
/// probe time.
#[derive(Debug, Default)]
pub struct Heap {
    items: Vec<Option<HeapItem>>,
    primary_key: Option<AttrNumber>,
    index: BTreeMap<Vec<u8>, Vec<ItemPointer>>,
}

pub type SharedHeap = Arc<RwLock<Heap>>;

impl Heap {
    pub fn new(primary_key: Option<AttrNumber>) -> Self {
        Self {
            items: Vec::new(),
            primary_key,
            index: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn key_of<'v>(&self, values: &'v [Option<Datum>]) -> Option<&'v Datum> {
        let attno = self.primary_key?;
        (attno as usize)
            .checked_sub(1)
            .and_then(|idx| values.get(idx))
            .and_then(|v| v.as_ref())
    }

    /// Decide whether `values` may be inserted by `xid` without breaking
    /// primary-key uniqueness.
    pub fn probe_key(
        &self,
        values: &[Option<Datum>],
        xid: Xid,
        status: &dyn Fn(Xid) -> XactStatus,
    ) -> KeyProbe {
        let Some(key) = self.key_of(values) else {
            return KeyProbe::Free;
        };
        let Some(tids) = self.index.get(key.as_bytes()) else {
            return KeyProbe::Free;
        };
        for tid in tids {
            let Some(item) = self.items.get(tid.0 as usize).and_then(|i| i.as_ref()) else {
                continue;
            };
            let h = item.header;
            let inserter = if h.xmin == xid {
                XactStatus::Committed
            } else {
                status(h.xmin)
            };
            match inserter {
                XactStatus::Aborted => continue,
                XactStatus::InProgress => return KeyProbe::WaitFor(h.xmin),
                XactStatus::Committed => {}
            }
            if h.xmax == xid {
                continue;
            }
            if !h.xmax.is_valid() {
                return KeyProbe::Taken;
            }
            match status(h.xmax) {
                XactStatus::Committed => continue,
                XactStatus::Aborted => return KeyProbe::Taken,
                XactStatus::InProgress => return KeyProbe::WaitFor(h.xmax),
            }
        }
        KeyProbe::Free
    }

    /// Append a new version. Uniqueness must already have been probed.
    pub fn append(&mut self, values: Vec<Option<Datum>>, xid: Xid, cid: CommandId) -> ItemPointer {
        let tid = ItemPointer(self.items.len() as u64);
        if let Some(key) = self.key_of(&values) {
            self.index
                .entry(key.as_bytes().to_vec())
                .or_default()
                .push(tid);
        }
        self.items.push(Some(HeapItem {
            header: TupleHeader::inserted_by(xid, cid),
            values,
        }));
        tid
    }

    /// Put a frozen version back at its original position while loading from
    /// durable storage.
    pub fn restore(&mut self, tid: ItemPointer, values: Vec<Option<Datum>>) {
        let pos = tid.0 as usize;
        if self.items.len() <= pos {
            self.items.resize(pos + 1, None);
        }
        if let Some(key) = self.key_of(&values) {
            self.index
                .entry(key.as_bytes().to_vec())
                .or_default()
                .push(tid);
        }
        self.items[pos] = Some(HeapItem {
            header: TupleHeader::frozen(),
            values,
        });
    }

    /// Mark `tid` deleted by `xid`, unless someone else got there first.
    ///
    /// The version must be visible to `snapshot`, the snapshot under which
    /// the caller located it.
    pub fn try_delete(
        &mut self,
        tid: ItemPointer,
        xid: Xid,
        cid: CommandId,
        snapshot: &Snapshot,
        status: &dyn Fn(Xid) -> XactStatus,
    ) -> Result<DeleteAttempt, HostError> {
        let item = self
            .items
            .get_mut(tid.0 as usize)
            .and_then(|i| i.as_mut())
            .ok_or(HostError::InvalidItemPointer(tid))?;
        let h = &mut item.header;
        if h.xmax.is_valid() {
            if h.xmax == xid {
                return Err(HostError::AlreadyDeletedBySelf);
            }
            match status(h.xmax) {
                XactStatus::InProgress => return Ok(DeleteAttempt::WaitFor(h.xmax)),
                XactStatus::Committed => return Err(HostError::ConcurrentDelete),
                XactStatus::Aborted => {}
            }
        }
        if !snapshot.is_visible(h, status) {
            return Err(HostError::InvisibleTuple(tid));
        }
        h.xmax = xid;
        h.cmax = cid;
        Ok(DeleteAttempt::Deleted)
    }

    /// Strip references to transactions older than `horizon`.
    ///
    /// Every xid below `horizon` has finished and is seen as such by every
    /// snapshot in use. Versions inserted by an aborted transaction or deleted
    /// by a committed one are removed, committed inserters are frozen and
    /// aborted deleters are cleared.
    pub fn vacuum(&mut self, horizon: Xid, status: &dyn Fn(Xid) -> XactStatus) -> VacuumStats {
        let mut stats = VacuumStats::default();
        for pos in 0..self.items.len() {
            let Some(item) = self.items[pos].as_mut() else {
                continue;
            };
            let h = &mut item.header;
            let settled = |xid: Xid| {
                if xid.is_valid() && xid != Xid::FROZEN && xid < horizon {
                    Some(status(xid))
                } else {
                    None
                }
            };
            let inserter = settled(h.xmin);
            let deleter = settled(h.xmax);
            let dead = inserter == Some(XactStatus::Aborted)
                || deleter == Some(XactStatus::Committed);
            if !dead {
                if inserter == Some(XactStatus::Committed) {
                    h.xmin = Xid::FROZEN;
                    h.cmin = 0;
                    stats.frozen += 1;
                }
                if deleter == Some(XactStatus::Aborted) {
                    h.xmax = Xid::INVALID;
                    h.cmax = 0;
                }
            }
            if dead {
                if let Some(item) = self.items[pos].take() {
                    self.unindex(&item.values, ItemPointer(pos as u64));
                }
                stats.removed += 1;
            }
        }
        stats
    }

    fn unindex(&mut self, values: &[Option<Datum>], tid: ItemPointer) {
        let Some(key) = self.key_of(values).map(|k| k.as_bytes().to_vec()) else {
            return;
        };
        if let Some(tids) = self.index.get_mut(&key) {
            tids.retain(|t| *t != tid);
            if tids.is_empty() {
                self.index.remove(&key);
            }
        }
    }

    /// Number of stored versions, dead or alive.
    pub fn stored(&self) -> usize {
        self.items.iter().filter(|i| i.is_some()).count()
    }

    pub fn values(&self, tid: ItemPointer) -> Option<&[Option<Datum>]> {
        self.items
            .get(tid.0 as usize)
            .and_then(|i| i.as_ref())
            .map(|i| i.values.as_slice())
    }

    fn next_match(
        &self,
        from: &mut usize,
        snapshot: &Snapshot,
        keys: &[ScanKey],
        status: &dyn Fn(Xid) -> XactStatus,
        interrupted: &dyn Fn() -> Result<(), HostError>,
    ) -> Result<Option<HeapTuple>, HostError> {
        while *from < self.items.len() {
            interrupted()?;
            let pos = *from;
            *from += 1;
            let Some(item) = &self.items[pos] else {
                continue;
            };
            if !snapshot.is_visible(&item.header, status) {
                continue;
            }
            if keys.iter().all(|k| k.matches(&item.values)) {
                return Ok(Some(HeapTuple {
                    tid: ItemPointer(pos as u64),
                    values: item.values.clone(),
                }));
            }
        }
        Ok(None)
    }
}

/// Forward scan over a heap under a snapshot and a set of scan keys.
///
/// The scan does not hold the heap lock between rows; versions appended
/// after the scan started are still subject to the snapshot.
#[derive(Debug)]
pub struct HeapScan {
    relid: Oid,
    heap: SharedHeap,
    snapshot: Snapshot,
    keys: Vec<ScanKey>,
    position: usize,
}

impl HeapScan {
    pub fn new(relid: Oid, heap: SharedHeap, snapshot: Snapshot, keys: Vec<ScanKey>) -> Self {
        Self {
            relid,
            heap,
            snapshot,
            keys,
            position: 0,
        }
    }

    pub fn relid(&self) -> Oid {
        self.relid
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn next(
        &mut self,
        status: &dyn Fn(Xid) -> XactStatus,
        interrupted: &dyn Fn() -> Result<(), HostError>,
    ) -> Result<Option<HeapTuple>, HostError> {
        let heap = self.heap.read();
        heap.next_match(
            &mut self.position,
            &self.snapshot,
            &self.keys,
            status,
            interrupted,
        )
    }
}
