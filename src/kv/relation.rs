use tracing::debug;

use crate::engine::{LockMode, Oid};
use crate::error::KvError;
use crate::host::{Host, Relation};

/// An open relation that is closed, and its lock released, when dropped.
pub(crate) struct RelationGuard<'h> {
    host: &'h dyn Host,
    relation: Option<Relation>,
    mode: LockMode,
}

impl<'h> RelationGuard<'h> {
    pub(crate) fn open(host: &'h dyn Host, relid: Oid, mode: LockMode) -> Result<Self, KvError> {
        let relation = host.open_relation(relid, mode)?;
        debug!(relid, %mode, "opened store");
        Ok(Self {
            host,
            relation: Some(relation),
            mode,
        })
    }

    pub(crate) fn host(&self) -> &'h dyn Host {
        self.host
    }

    pub(crate) fn mode(&self) -> LockMode {
        self.mode
    }

    pub(crate) fn relation(&self) -> &Relation {
        match &self.relation {
            Some(relation) => relation,
            None => unreachable!("relation is only taken on drop"),
        }
    }
}

impl Drop for RelationGuard<'_> {
    fn drop(&mut self) {
        if let Some(relation) = self.relation.take() {
            self.host.close_relation(relation, self.mode);
        }
    }
}
