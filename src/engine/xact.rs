//! Transaction id allocation and commit status.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use parking_lot::Mutex;

/// Transaction identifier. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Xid(pub u64);

impl Xid {
    pub const INVALID: Xid = Xid(0);
    /// Inserter of rows loaded from durable storage; committed for everyone.
    pub const FROZEN: Xid = Xid(2);
    const FIRST_NORMAL: Xid = Xid(3);

    pub fn is_valid(self) -> bool {
        self != Xid::INVALID
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Statement counter within one transaction.
pub type CommandId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XactStatus {
    InProgress,
    Committed,
    Aborted,
}

/// Point-in-time view of which transactions are running.
#[derive(Debug, Clone)]
pub struct RunningXacts {
    /// Oldest running xid, or `xmax` when none are running.
    pub xmin: Xid,
    /// First xid not yet assigned.
    pub xmax: Xid,
    pub in_progress: BTreeSet<Xid>,
}

struct XactTable {
    next_xid: u64,
    status: HashMap<Xid, XactStatus>,
    /// holder → xmin of the snapshot it is reading through
    snapshots: HashMap<u64, Xid>,
}

impl XactTable {
    fn running(&self) -> RunningXacts {
        let in_progress: BTreeSet<Xid> = self
            .status
            .iter()
            .filter(|(_, s)| **s == XactStatus::InProgress)
            .map(|(xid, _)| *xid)
            .collect();
        let xmax = Xid(self.next_xid);
        let xmin = in_progress.first().copied().unwrap_or(xmax);
        RunningXacts {
            xmin,
            xmax,
            in_progress,
        }
    }
}

/// Hands out transaction ids, records their outcome and tracks the snapshots
/// in use so finished ids can be forgotten once nobody can see them.
pub struct TransactionManager {
    table: Mutex<XactTable>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(XactTable {
                next_xid: Xid::FIRST_NORMAL.0,
                status: HashMap::new(),
                snapshots: HashMap::new(),
            }),
        }
    }

    pub fn begin(&self) -> Xid {
        let mut table = self.table.lock();
        let xid = Xid(table.next_xid);
        table.next_xid += 1;
        table.status.insert(xid, XactStatus::InProgress);
        xid
    }

    pub fn commit(&self, xid: Xid) {
        self.table.lock().status.insert(xid, XactStatus::Committed);
    }

    pub fn abort(&self, xid: Xid) {
        self.table.lock().status.insert(xid, XactStatus::Aborted);
    }

    /// Outcome of `xid`. Ids below the last pruned horizon no longer appear
    /// in any tuple header, so an unknown id is reported as aborted.
    pub fn status(&self, xid: Xid) -> XactStatus {
        if xid == Xid::FROZEN {
            return XactStatus::Committed;
        }
        self.table
            .lock()
            .status
            .get(&xid)
            .copied()
            .unwrap_or(XactStatus::Aborted)
    }

    /// Take a view of the running transactions and register it under
    /// `holder`, replacing whatever that holder registered before.
    pub fn snapshot(&self, holder: u64) -> RunningXacts {
        let mut table = self.table.lock();
        let running = table.running();
        table.snapshots.insert(holder, running.xmin);
        running
    }

    pub fn release_snapshot(&self, holder: u64) {
        self.table.lock().snapshots.remove(&holder);
    }

    /// Oldest xid any running transaction or registered snapshot may still
    /// consider in progress. Everything older has finished for everyone.
    pub fn horizon(&self) -> Xid {
        let table = self.table.lock();
        let oldest_running = table.running().xmin;
        table
            .snapshots
            .values()
            .copied()
            .fold(oldest_running, Xid::min)
    }

    /// Forget the outcome of every transaction older than `horizon`. Callers
    /// must first have frozen or removed every tuple version those ids stamp.
    pub fn prune(&self, horizon: Xid) -> usize {
        let mut table = self.table.lock();
        let before = table.status.len();
        table
            .status
            .retain(|xid, status| *xid >= horizon || *status == XactStatus::InProgress);
        before - table.status.len()
    }

    /// Number of transaction outcomes currently remembered.
    pub fn tracked(&self) -> usize {
        self.table.lock().status.len()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
