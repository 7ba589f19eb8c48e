use crate::engine::{ItemPointer, LockMode, TupleSlot};
use crate::error::KvError;
use crate::kv::relation::RelationGuard;
use crate::kv::scan::StoreScan;

/// Insert through the host's simple-insert path. A duplicate key surfaces as
/// the host's unique violation.
pub(crate) fn insert(rel: &RelationGuard<'_>, slot: &mut TupleSlot<'_>) -> Result<ItemPointer, KvError> {
    debug_assert_eq!(rel.mode(), LockMode::RowExclusive);
    Ok(rel.host().insert_tuple(rel.relation(), slot)?)
}

/// Delete the version at `tid`, which `scan` located and still has open.
pub(crate) fn delete(scan: &StoreScan<'_, '_>, tid: ItemPointer) -> Result<(), KvError> {
    let rel = scan.relation();
    debug_assert_eq!(rel.mode(), LockMode::RowExclusive);
    rel.host()
        .delete_tuple(rel.relation(), tid, scan.snapshot())?;
    Ok(())
}
