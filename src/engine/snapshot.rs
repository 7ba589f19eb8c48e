//! Tuple visibility.
//!
//! # Visibility rules
//!
//! An MVCC snapshot sees a tuple version when its inserter is visible and its
//! deleter (if any) is not:
//!
//! - the snapshot's own transaction is visible for commands issued before the
//!   snapshot's command id; the current statement never sees its own writes;
//! - another transaction is visible when it committed, was not running when
//!   the snapshot was taken, and started before it.
//!
//! The self snapshot sees everything committed right now plus every write of
//! its own transaction, regardless of command id.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::engine::xact::{CommandId, RunningXacts, XactStatus, Xid};

/// Header carried by every tuple version in a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleHeader {
    pub xmin: Xid,
    pub cmin: CommandId,
    /// `Xid::INVALID` while the version is live.
    pub xmax: Xid,
    pub cmax: CommandId,
}

impl TupleHeader {
    pub fn inserted_by(xmin: Xid, cmin: CommandId) -> Self {
        Self {
            xmin,
            cmin,
            xmax: Xid::INVALID,
            cmax: 0,
        }
    }

    pub fn frozen() -> Self {
        Self::inserted_by(Xid::FROZEN, 0)
    }
}

#[derive(Debug, Clone)]
pub struct MvccSnapshot {
    /// Transaction owning the snapshot.
    pub xid: Xid,
    pub curcid: CommandId,
    pub xmin: Xid,
    pub xmax: Xid,
    pub in_progress: Arc<BTreeSet<Xid>>,
}

impl MvccSnapshot {
    pub fn new(xid: Xid, curcid: CommandId, running: RunningXacts) -> Self {
        Self {
            xid,
            curcid,
            xmin: running.xmin,
            xmax: running.xmax,
            in_progress: Arc::new(running.in_progress),
        }
    }

    /// Same view of other transactions, later statement of our own.
    pub fn with_command(&self, curcid: CommandId) -> Self {
        Self {
            curcid,
            ..self.clone()
        }
    }

    fn sees_other(&self, xid: Xid, status: &dyn Fn(Xid) -> XactStatus) -> bool {
        if xid == Xid::FROZEN {
            return true;
        }
        if xid >= self.xmax || self.in_progress.contains(&xid) {
            return false;
        }
        status(xid) == XactStatus::Committed
    }
}

/// Visibility view used by a scan.
#[derive(Debug, Clone)]
pub enum Snapshot {
    Mvcc(MvccSnapshot),
    SelfVisible { xid: Xid },
}

impl Snapshot {
    pub fn is_visible(&self, header: &TupleHeader, status: &dyn Fn(Xid) -> XactStatus) -> bool {
        match self {
            Snapshot::Mvcc(snap) => {
                let inserted = if header.xmin == snap.xid {
                    header.cmin < snap.curcid
                } else {
                    snap.sees_other(header.xmin, status)
                };
                if !inserted {
                    return false;
                }
                if !header.xmax.is_valid() {
                    return true;
                }
                if header.xmax == snap.xid {
                    return header.cmax >= snap.curcid;
                }
                !snap.sees_other(header.xmax, status)
            }
            Snapshot::SelfVisible { xid } => {
                let inserted =
                    header.xmin == *xid || status(header.xmin) == XactStatus::Committed;
                if !inserted {
                    return false;
                }
                if !header.xmax.is_valid() {
                    return true;
                }
                if header.xmax == *xid {
                    return false;
                }
                status(header.xmax) != XactStatus::Committed
            }
        }
    }
}
