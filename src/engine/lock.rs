//! Lock manager for relations and transactions.
//!
//! Every transaction holds `AccessExclusive` on its own [`LockTag::Transaction`]
//! until it ends. Waiting for another transaction to finish is a request for
//! `AccessShare` on that tag, so those waits show up in the wait-for graph
//! next to relation lock waits.
//!
//! # Conflict table
//!
//! ```text
//!                  │ AccessShare │ RowExclusive │ AccessExclusive │
//! ─────────────────┼─────────────┼──────────────┼─────────────────┤
//! AccessShare      │      ✓      │      ✓       │        ✗        │
//! RowExclusive     │      ✓      │      ✓       │        ✗        │
//! AccessExclusive  │      ✗      │      ✗       │        ✗        │
//! ```
//!
//! Locks are owned by a backend and are re-entrant: an owner never conflicts
//! with itself. A blocked request polls for cancellation, honours the
//! configured timeout, and fails with `Deadlock` when waiting would close a
//! cycle in the wait-for graph.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::engine::error::HostError;
use crate::engine::types::Oid;
use crate::engine::xact::Xid;

/// Granularity at which waits re-check deadlines and interrupts.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// The object a lock is taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockTag {
    Relation(Oid),
    Transaction(Xid),
}

impl fmt::Display for LockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTag::Relation(oid) => write!(f, "relation {oid}"),
            LockTag::Transaction(xid) => write!(f, "transaction {xid}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockMode {
    /// Taken by readers. Conflicts only with schema changes.
    AccessShare,
    /// Taken by writers. Concurrent writers are allowed.
    RowExclusive,
    /// Taken by DDL; excludes everyone else.
    AccessExclusive,
}

impl LockMode {
    pub fn conflicts_with(self, other: LockMode) -> bool {
        matches!(
            (self, other),
            (LockMode::AccessExclusive, _) | (_, LockMode::AccessExclusive)
        )
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::AccessShare => write!(f, "AccessShareLock"),
            LockMode::RowExclusive => write!(f, "RowExclusiveLock"),
            LockMode::AccessExclusive => write!(f, "AccessExclusiveLock"),
        }
    }
}

/// Identifies the backend holding or requesting a lock.
pub type LockOwner = u64;

#[derive(Default)]
struct LockTable {
    /// tag → (owner, mode) → hold count
    granted: HashMap<LockTag, HashMap<(LockOwner, LockMode), usize>>,
    /// owner → request it is blocked on
    waiting: HashMap<LockOwner, (LockTag, LockMode)>,
}

impl LockTable {
    fn blockers(&self, tag: LockTag, mode: LockMode, requester: LockOwner) -> Vec<LockOwner> {
        self.granted
            .get(&tag)
            .map(|holders| {
                holders
                    .keys()
                    .filter(|(owner, held)| *owner != requester && held.conflicts_with(mode))
                    .map(|(owner, _)| *owner)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn would_deadlock(&self, requester: LockOwner, tag: LockTag, mode: LockMode) -> bool {
        let mut stack = self.blockers(tag, mode, requester);
        let mut visited = Vec::new();
        while let Some(owner) = stack.pop() {
            if owner == requester {
                return true;
            }
            if visited.contains(&owner) {
                continue;
            }
            visited.push(owner);
            if let Some((r, m)) = self.waiting.get(&owner) {
                stack.extend(self.blockers(*r, *m, owner));
            }
        }
        false
    }

    fn grant(&mut self, owner: LockOwner, tag: LockTag, mode: LockMode) {
        *self
            .granted
            .entry(tag)
            .or_default()
            .entry((owner, mode))
            .or_insert(0) += 1;
    }
}

pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
        }
    }

    /// Acquire `mode` on `tag`, blocking while another owner holds a
    /// conflicting mode.
    pub fn acquire(
        &self,
        owner: LockOwner,
        tag: LockTag,
        mode: LockMode,
        timeout: Option<Duration>,
        interrupted: &dyn Fn() -> Result<(), HostError>,
    ) -> Result<(), HostError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut table = self.table.lock();
        loop {
            if table.blockers(tag, mode, owner).is_empty() {
                table.waiting.remove(&owner);
                table.grant(owner, tag, mode);
                return Ok(());
            }
            if table.would_deadlock(owner, tag, mode) {
                table.waiting.remove(&owner);
                warn!(owner, %tag, %mode, "deadlock detected");
                return Err(HostError::Deadlock(tag));
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    table.waiting.remove(&owner);
                    return Err(HostError::LockTimeout(tag));
                }
            }
            if table.waiting.insert(owner, (tag, mode)).is_none() {
                debug!(owner, %tag, %mode, "waiting for lock");
            }
            self.released.wait_for(&mut table, WAIT_POLL);
            drop(table);
            let check = interrupted();
            table = self.table.lock();
            if let Err(e) = check {
                table.waiting.remove(&owner);
                return Err(e);
            }
        }
    }

    /// Grant `mode` on `tag` without waiting. Only for tags no other owner
    /// can hold yet, such as a freshly assigned transaction id.
    pub fn grant_new(&self, owner: LockOwner, tag: LockTag, mode: LockMode) {
        self.table.lock().grant(owner, tag, mode);
    }

    /// Release one hold of `mode` on `tag`. Returns false if it was not held.
    pub fn release(&self, owner: LockOwner, tag: LockTag, mode: LockMode) -> bool {
        let mut table = self.table.lock();
        let Some(holders) = table.granted.get_mut(&tag) else {
            return false;
        };
        let Some(count) = holders.get_mut(&(owner, mode)) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            holders.remove(&(owner, mode));
            if holders.is_empty() {
                table.granted.remove(&tag);
            }
        }
        drop(table);
        self.released.notify_all();
        true
    }

    /// Release every lock held by `owner`. Returns how many holds were dropped.
    pub fn release_all(&self, owner: LockOwner) -> usize {
        let mut table = self.table.lock();
        let mut dropped = 0;
        table.granted.retain(|_, holders| {
            holders.retain(|(o, _), count| {
                if *o == owner {
                    dropped += *count;
                    false
                } else {
                    true
                }
            });
            !holders.is_empty()
        });
        table.waiting.remove(&owner);
        drop(table);
        if dropped > 0 {
            self.released.notify_all();
        }
        dropped
    }

    /// The request `owner` is blocked on, if any.
    pub fn waiting_for(&self, owner: LockOwner) -> Option<(LockTag, LockMode)> {
        self.table.lock().waiting.get(&owner).copied()
    }

    /// Locks currently held by `owner`, sorted.
    pub fn held_by(&self, owner: LockOwner) -> Vec<(LockTag, LockMode)> {
        let table = self.table.lock();
        let mut held: Vec<(LockTag, LockMode)> = table
            .granted
            .iter()
            .flat_map(|(tag, holders)| {
                holders
                    .keys()
                    .filter(move |(o, _)| *o == owner)
                    .map(move |(_, mode)| (*tag, *mode))
            })
            .collect();
        held.sort();
        held
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
