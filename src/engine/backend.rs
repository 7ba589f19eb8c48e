use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::IsolationLevel;
use crate::engine::catalog::ColumnDef;
use crate::engine::error::HostError;
use crate::engine::heap::{DeleteAttempt, Heap, HeapScan, KeyProbe};
use crate::engine::lock::{LockMode, LockOwner, LockTag};
use crate::engine::redb::HeapChange;
use crate::engine::snapshot::{MvccSnapshot, Snapshot};
use crate::engine::types::{HeapTuple, ItemPointer, Oid, ScanKey, TupleSlot};
use crate::engine::xact::{CommandId, XactStatus, Xid};
use crate::engine::Shared;
use crate::host::{Host, Relation};

struct Transaction {
    xid: Xid,
    cid: CommandId,
    /// Started by a statement outside `begin`; ends with that statement.
    implicit: bool,
    /// A statement failed; only rollback is accepted.
    failed: bool,
    /// Repeatable read: the snapshot taken by the first statement.
    xact_snapshot: Option<MvccSnapshot>,
    /// Heap changes to persist at commit.
    changes: Vec<HeapChange>,
}

impl Transaction {
    fn new(xid: Xid, implicit: bool) -> Self {
        Self {
            xid,
            cid: 0,
            implicit,
            failed: false,
            xact_snapshot: None,
            changes: Vec::new(),
        }
    }
}

/// Requests cancellation of whatever statement the backend is running.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// One database session.
///
/// A backend runs one statement at a time on the thread that owns it. Statements
/// run in autocommit mode unless wrapped in `begin`/`commit`.
pub struct Backend {
    id: LockOwner,
    shared: Arc<Shared>,
    xact: RefCell<Option<Transaction>>,
    statement: RefCell<Option<MvccSnapshot>>,
    open_scans: Cell<usize>,
    cancel: Arc<AtomicBool>,
}

impl Backend {
    pub(crate) fn new(id: LockOwner, shared: Arc<Shared>) -> Self {
        Self {
            id,
            shared,
            xact: RefCell::new(None),
            statement: RefCell::new(None),
            open_scans: Cell::new(0),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    pub fn in_transaction(&self) -> bool {
        self.xact.borrow().is_some()
    }

    /// Relation locks currently held by this session.
    pub fn held_locks(&self) -> Vec<(Oid, LockMode)> {
        self.shared
            .locks
            .held_by(self.id)
            .into_iter()
            .filter_map(|(tag, mode)| match tag {
                LockTag::Relation(relid) => Some((relid, mode)),
                LockTag::Transaction(_) => None,
            })
            .collect()
    }

    /// Heap scans begun and not yet ended.
    pub fn open_scans(&self) -> usize {
        self.open_scans.get()
    }

    // ── Transaction control ─────────────────────────────────────────

    pub fn begin(&self) {
        let mut xact = self.xact.borrow_mut();
        match xact.as_ref() {
            Some(_) => warn!(backend = self.id, "there is already a transaction in progress"),
            None => {
                let tx = self.start_transaction(false);
                debug!(backend = self.id, xid = %tx.xid, "begin");
                *xact = Some(tx);
            }
        }
    }

    /// Assign an xid and lock it; others wait for us by locking it too.
    fn start_transaction(&self, implicit: bool) -> Transaction {
        let xid = self.shared.xacts.begin();
        self.shared
            .locks
            .grant_new(self.id, LockTag::Transaction(xid), LockMode::AccessExclusive);
        Transaction::new(xid, implicit)
    }

    /// Commit the open transaction. A failed transaction is rolled back instead.
    pub fn commit(&self) -> Result<(), HostError> {
        let failed = match self.xact.borrow().as_ref() {
            Some(tx) => tx.failed,
            None => {
                warn!(backend = self.id, "there is no transaction in progress");
                return Ok(());
            }
        };
        if failed {
            warn!(backend = self.id, "transaction had failed; rolling back");
            self.finish(false)
        } else {
            self.finish(true)
        }
    }

    pub fn rollback(&self) {
        if self.xact.borrow().is_none() {
            warn!(backend = self.id, "there is no transaction in progress");
            return;
        }
        // Aborting never touches storage.
        let _ = self.finish(false);
    }

    /// Run one statement. `f` sees this backend through the `Host` interface.
    ///
    /// Outside an explicit transaction the statement commits on success and
    /// rolls back on failure. Inside one, a failure leaves the transaction in
    /// the failed state until `rollback` (or `commit`, which rolls back).
    pub fn execute<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Host) -> Result<T, E>,
        E: From<HostError>,
    {
        self.start_statement()?;
        let result = f(self);
        let implicit = self.end_statement();

        match (&result, implicit) {
            (Ok(_), true) => self.finish(true)?,
            (Err(_), true) => {
                let _ = self.finish(false);
            }
            (Err(_), false) => {
                if let Some(tx) = self.xact.borrow_mut().as_mut() {
                    tx.failed = true;
                }
            }
            (Ok(_), false) => {}
        }
        result
    }

    fn start_statement(&self) -> Result<(), HostError> {
        let mut xact = self.xact.borrow_mut();
        if xact.as_ref().is_some_and(|tx| tx.failed) {
            return Err(HostError::InFailedTransaction);
        }
        let tx = xact.get_or_insert_with(|| self.start_transaction(true));
        let (xid, cid) = (tx.xid, tx.cid);
        let snapshot = match self.shared.config.isolation {
            IsolationLevel::ReadCommitted => {
                MvccSnapshot::new(xid, cid, self.shared.xacts.snapshot(self.id))
            }
            IsolationLevel::RepeatableRead => tx
                .xact_snapshot
                .get_or_insert_with(|| {
                    MvccSnapshot::new(xid, cid, self.shared.xacts.snapshot(self.id))
                })
                .with_command(cid),
        };
        *self.statement.borrow_mut() = Some(snapshot);
        Ok(())
    }

    /// Returns whether the transaction was implicit.
    fn end_statement(&self) -> bool {
        self.statement.borrow_mut().take();
        if self.shared.config.isolation == IsolationLevel::ReadCommitted {
            self.shared.xacts.release_snapshot(self.id);
        }
        let leaked = self.open_scans.replace(0);
        if leaked > 0 {
            warn!(backend = self.id, leaked, "statement ended with open scans");
        }
        match self.xact.borrow_mut().as_mut() {
            Some(tx) => {
                tx.cid += 1;
                tx.implicit
            }
            None => false,
        }
    }

    fn finish(&self, commit: bool) -> Result<(), HostError> {
        let Some(tx) = self.xact.borrow_mut().take() else {
            return Ok(());
        };
        let mut outcome = Ok(());
        if commit {
            let persisted = match &self.shared.storage {
                Some(storage) => storage.apply(&tx.changes),
                None => Ok(()),
            };
            match persisted {
                Ok(()) => {
                    self.shared.xacts.commit(tx.xid);
                    debug!(backend = self.id, xid = %tx.xid, changes = tx.changes.len(), "commit");
                }
                Err(e) => {
                    warn!(backend = self.id, xid = %tx.xid, error = %e, "commit failed; aborting");
                    self.shared.xacts.abort(tx.xid);
                    outcome = Err(e);
                }
            }
        } else {
            self.shared.xacts.abort(tx.xid);
            debug!(backend = self.id, xid = %tx.xid, "rollback");
        }
        self.shared.xacts.release_snapshot(self.id);
        let released = self.shared.locks.release_all(self.id);
        debug!(backend = self.id, released, "released locks at transaction end");
        self.shared.transaction_finished();
        outcome
    }

    fn current_command(&self) -> Result<(Xid, CommandId), HostError> {
        if self.statement.borrow().is_none() {
            return Err(HostError::NoActiveStatement);
        }
        self.xact
            .borrow()
            .as_ref()
            .map(|tx| (tx.xid, tx.cid))
            .ok_or(HostError::NoActiveStatement)
    }

    fn record(&self, change: HeapChange) {
        if self.shared.storage.is_none() {
            return;
        }
        if let Some(tx) = self.xact.borrow_mut().as_mut() {
            tx.changes.push(change);
        }
    }

    fn status(&self, xid: Xid) -> XactStatus {
        self.shared.xacts.status(xid)
    }

    /// Block until `xid` ends by taking a share lock on it, then let go.
    fn wait_for_xact(&self, xid: Xid, relid: Oid) -> Result<(), HostError> {
        debug!(backend = self.id, %xid, relid, "waiting for transaction");
        let tag = LockTag::Transaction(xid);
        self.shared.locks.acquire(
            self.id,
            tag,
            LockMode::AccessShare,
            self.shared.config.lock_timeout,
            &|| self.check_interrupts(),
        )?;
        self.shared.locks.release(self.id, tag, LockMode::AccessShare);
        Ok(())
    }

    // ── DDL ─────────────────────────────────────────────────────────
    //
    // Schema changes take effect immediately and are not undone by rollback.

    pub fn create_schema(&self, name: &str) -> Result<Oid, HostError> {
        let mut catalog = self.shared.catalog.write();
        let oid = catalog.create_namespace(name)?;
        if let Some(storage) = &self.shared.storage {
            if let Err(e) = storage.put_namespace(name, oid) {
                let _ = catalog.drop_namespace(name);
                return Err(e);
            }
        }
        info!(schema = name, oid, "created schema");
        Ok(oid)
    }

    pub fn create_table(
        &self,
        schema: &str,
        name: &str,
        columns: &[ColumnDef],
        primary_key: Option<&str>,
    ) -> Result<Oid, HostError> {
        let mut catalog = self.shared.catalog.write();
        let info = catalog.create_table(schema, name, columns, primary_key)?;
        if let Some(storage) = &self.shared.storage {
            if let Err(e) = storage.put_relation(&info) {
                catalog.drop_relation(info.oid);
                return Err(e);
            }
        }
        self.shared
            .heaps
            .write()
            .insert(info.oid, Arc::new(RwLock::new(Heap::new(info.primary_key))));
        info!(schema, table = name, oid = info.oid, "created table");
        Ok(info.oid)
    }

    /// Drop a table. Waits until no other session has it open.
    pub fn drop_table(&self, schema: &str, name: &str) -> Result<(), HostError> {
        let relid = {
            let catalog = self.shared.catalog.read();
            let nsp = catalog
                .namespace_oid(schema)
                .ok_or_else(|| HostError::UndefinedSchema(schema.to_string()))?;
            catalog
                .relation_oid(name, nsp)
                .ok_or_else(|| HostError::UndefinedTableName(format!("{schema}.{name}")))?
        };
        self.shared.locks.acquire(
            self.id,
            LockTag::Relation(relid),
            LockMode::AccessExclusive,
            self.shared.config.lock_timeout,
            &|| self.check_interrupts(),
        )?;

        let result = match &self.shared.storage {
            Some(storage) => storage.remove_relation(relid),
            None => Ok(()),
        };
        if result.is_ok() {
            self.shared.catalog.write().drop_relation(relid);
            self.shared.heaps.write().remove(&relid);
            info!(schema, table = name, oid = relid, "dropped table");
        }

        self.shared
            .locks
            .release(self.id, LockTag::Relation(relid), LockMode::AccessExclusive);
        result
    }

    /// Drop an empty schema.
    pub fn drop_schema(&self, name: &str) -> Result<(), HostError> {
        let mut catalog = self.shared.catalog.write();
        let oid = catalog.drop_namespace(name)?;
        if let Some(storage) = &self.shared.storage {
            if let Err(e) = storage.remove_namespace(name) {
                catalog.restore_namespace(name, oid);
                return Err(e);
            }
        }
        info!(schema = name, oid, "dropped schema");
        Ok(())
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        if self.xact.borrow().is_some() {
            debug!(backend = self.id, "session ended inside a transaction; rolling back");
            let _ = self.finish(false);
        }
    }
}

impl Host for Backend {
    fn namespace_oid(&self, name: &str) -> Option<Oid> {
        self.shared.catalog.read().namespace_oid(name)
    }

    fn relation_oid(&self, name: &str, namespace: Oid) -> Option<Oid> {
        self.shared.catalog.read().relation_oid(name, namespace)
    }

    fn open_relation(&self, relid: Oid, mode: LockMode) -> Result<Relation, HostError> {
        self.shared.locks.acquire(
            self.id,
            LockTag::Relation(relid),
            mode,
            self.shared.config.lock_timeout,
            &|| self.check_interrupts(),
        )?;
        // The relation may have been dropped while we waited for the lock.
        let info = self.shared.catalog.read().relation(relid);
        let heap = self.shared.heaps.read().get(&relid).cloned();
        match (info, heap) {
            (Some(info), Some(heap)) => {
                debug!(backend = self.id, relid, %mode, "opened relation");
                Ok(Relation { info, heap })
            }
            _ => {
                self.shared.locks.release(self.id, LockTag::Relation(relid), mode);
                Err(HostError::UndefinedTable(relid))
            }
        }
    }

    fn close_relation(&self, relation: Relation, mode: LockMode) {
        if self.open_scans.get() > 0 {
            warn!(backend = self.id, relid = relation.oid(), "closing relation with open scans");
        }
        if !self
            .shared
            .locks
            .release(self.id, LockTag::Relation(relation.oid()), mode)
        {
            warn!(backend = self.id, relid = relation.oid(), %mode, "lock was not held at close");
        }
        debug!(backend = self.id, relid = relation.oid(), %mode, "closed relation");
    }

    fn active_snapshot(&self) -> Result<Snapshot, HostError> {
        self.statement
            .borrow()
            .clone()
            .map(Snapshot::Mvcc)
            .ok_or(HostError::NoActiveStatement)
    }

    fn self_snapshot(&self) -> Result<Snapshot, HostError> {
        let (xid, _) = self.current_command()?;
        Ok(Snapshot::SelfVisible { xid })
    }

    fn begin_scan(
        &self,
        relation: &Relation,
        snapshot: Snapshot,
        keys: Vec<ScanKey>,
    ) -> Result<HeapScan, HostError> {
        let natts = relation.desc().natts();
        if let Some(bad) = keys.iter().find(|k| relation.desc().attr(k.attno).is_none()) {
            return Err(HostError::InvalidAttribute {
                attno: bad.attno,
                natts,
            });
        }
        self.open_scans.set(self.open_scans.get() + 1);
        Ok(HeapScan::new(
            relation.oid(),
            Arc::clone(&relation.heap),
            snapshot,
            keys,
        ))
    }

    fn scan_next(&self, scan: &mut HeapScan) -> Result<Option<HeapTuple>, HostError> {
        scan.next(&|xid| self.status(xid), &|| self.check_interrupts())
    }

    fn end_scan(&self, scan: HeapScan) {
        self.open_scans.set(self.open_scans.get().saturating_sub(1));
        debug!(backend = self.id, relid = scan.relid(), "ended scan");
    }

    fn insert_tuple(
        &self,
        relation: &Relation,
        slot: &mut TupleSlot<'_>,
    ) -> Result<ItemPointer, HostError> {
        let (xid, cid) = self.current_command()?;
        let values = slot.materialize()?;
        let natts = relation.desc().natts();
        if values.len() != natts {
            return Err(HostError::InvalidAttribute {
                attno: values.len() as u16,
                natts,
            });
        }
        let persisted = self.shared.storage.is_some().then(|| values.clone());

        loop {
            let mut heap = relation.heap.write();
            match heap.probe_key(&values, xid, &|x| self.status(x)) {
                KeyProbe::Free => {
                    let tid = heap.append(values, xid, cid);
                    drop(heap);
                    if let Some(values) = persisted {
                        self.record(HeapChange::Insert {
                            relid: relation.oid(),
                            tid,
                            values,
                        });
                    }
                    return Ok(tid);
                }
                KeyProbe::Taken => {
                    return Err(HostError::UniqueViolation {
                        relation: relation.name().to_string(),
                    });
                }
                KeyProbe::WaitFor(other) => {
                    drop(heap);
                    self.wait_for_xact(other, relation.oid())?;
                }
            }
        }
    }

    fn delete_tuple(
        &self,
        relation: &Relation,
        tid: ItemPointer,
        snapshot: &Snapshot,
    ) -> Result<(), HostError> {
        let (xid, cid) = self.current_command()?;
        loop {
            let mut heap = relation.heap.write();
            match heap.try_delete(tid, xid, cid, snapshot, &|x| self.status(x))? {
                DeleteAttempt::Deleted => {
                    drop(heap);
                    self.record(HeapChange::Delete {
                        relid: relation.oid(),
                        tid,
                    });
                    return Ok(());
                }
                DeleteAttempt::WaitFor(other) => {
                    drop(heap);
                    self.wait_for_xact(other, relation.oid())?;
                }
            }
        }
    }

    fn check_interrupts(&self) -> Result<(), HostError> {
        if self.cancel.swap(false, Ordering::SeqCst) {
            return Err(HostError::QueryCanceled);
        }
        Ok(())
    }
}
