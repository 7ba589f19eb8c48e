use crate::engine::heap::HeapScan;
use crate::engine::{Datum, HeapTuple, ScanKey, Snapshot, Strategy};
use crate::error::KvError;
use crate::kv::KEY_ATTNO;
use crate::kv::relation::RelationGuard;

/// Forward heap scan over the store with one key-column predicate, under the
/// statement's active snapshot.
///
/// Borrows the relation guard, so the scan always ends before the relation is
/// closed. Ended on drop.
pub(crate) struct StoreScan<'r, 'h> {
    rel: &'r RelationGuard<'h>,
    scan: Option<HeapScan>,
}

impl<'r, 'h> StoreScan<'r, 'h> {
    pub(crate) fn begin(
        rel: &'r RelationGuard<'h>,
        strategy: Strategy,
        argument: Datum,
    ) -> Result<Self, KvError> {
        let host = rel.host();
        let snapshot = host.active_snapshot()?;
        let key = ScanKey::new(KEY_ATTNO, strategy, argument);
        let scan = host.begin_scan(rel.relation(), snapshot, vec![key])?;
        Ok(Self {
            rel,
            scan: Some(scan),
        })
    }

    /// Next row satisfying the key. With `GreaterEqual` this may include
    /// keys that do not share the prefix; the heap is unordered.
    pub(crate) fn next(&mut self) -> Result<Option<HeapTuple>, KvError> {
        let Some(scan) = self.scan.as_mut() else {
            return Ok(None);
        };
        Ok(self.rel.host().scan_next(scan)?)
    }

    pub(crate) fn relation(&self) -> &'r RelationGuard<'h> {
        self.rel
    }

    pub(crate) fn snapshot(&self) -> &Snapshot {
        match &self.scan {
            Some(scan) => scan.snapshot(),
            None => unreachable!("scan is only taken on drop"),
        }
    }
}

impl Drop for StoreScan<'_, '_> {
    fn drop(&mut self) {
        if let Some(scan) = self.scan.take() {
            self.rel.host().end_scan(scan);
        }
    }
}
