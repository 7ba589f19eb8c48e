//! Durable catalog and heap contents, backed by redb.
//!
//! Only committed state is written. Rows are keyed by `(relation oid, item
//! pointer)` so that a reload puts every version back where it was.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::engine::catalog::RelationInfo;
use crate::engine::error::HostError;
use crate::engine::types::{Attribute, Datum, ItemPointer, Oid, TupleDesc};

const NAMESPACES: TableDefinition<&str, u32> = TableDefinition::new("pg_namespace");
const RELATIONS: TableDefinition<u32, &[u8]> = TableDefinition::new("pg_class");
const HEAP: TableDefinition<(u32, u64), &[u8]> = TableDefinition::new("heap");

/// A committed heap change, queued by the transaction that made it.
#[derive(Debug, Clone)]
pub enum HeapChange {
    Insert {
        relid: Oid,
        tid: ItemPointer,
        values: Vec<Option<Datum>>,
    },
    Delete {
        relid: Oid,
        tid: ItemPointer,
    },
}

impl HeapChange {
    pub fn relid(&self) -> Oid {
        match self {
            HeapChange::Insert { relid, .. } | HeapChange::Delete { relid, .. } => *relid,
        }
    }
}

/// Everything read back from disk on open.
#[derive(Debug, Default)]
pub struct StoredState {
    pub namespaces: Vec<(String, Oid)>,
    pub relations: Vec<RelationInfo>,
    pub rows: Vec<(Oid, ItemPointer, Vec<Option<Datum>>)>,
}

pub struct RedbStorage {
    db: Arc<Database>,
}

fn storage_err(e: impl std::fmt::Display) -> HostError {
    HostError::Storage(e.to_string())
}

impl RedbStorage {
    /// Open or create the database file and make sure every table exists.
    pub fn open(path: &Path) -> Result<Self, HostError> {
        let db = Database::create(path).map_err(storage_err)?;

        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            write_txn.open_table(NAMESPACES).map_err(storage_err)?;
            write_txn.open_table(RELATIONS).map_err(storage_err)?;
            write_txn.open_table(HEAP).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn load(&self) -> Result<StoredState, HostError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let mut state = StoredState::default();

        let namespaces = read_txn.open_table(NAMESPACES).map_err(storage_err)?;
        for entry in namespaces.iter().map_err(storage_err)? {
            let (name, oid) = entry.map_err(storage_err)?;
            state.namespaces.push((name.value().to_string(), oid.value()));
        }

        let relations = read_txn.open_table(RELATIONS).map_err(storage_err)?;
        for entry in relations.iter().map_err(storage_err)? {
            let (oid, bytes) = entry.map_err(storage_err)?;
            state
                .relations
                .push(decode_relation(oid.value(), bytes.value())?);
        }

        let heap = read_txn.open_table(HEAP).map_err(storage_err)?;
        for entry in heap.iter().map_err(storage_err)? {
            let (key, bytes) = entry.map_err(storage_err)?;
            let (relid, tid) = key.value();
            state
                .rows
                .push((relid, ItemPointer(tid), decode_row(bytes.value())?));
        }

        Ok(state)
    }

    pub fn put_namespace(&self, name: &str, oid: Oid) -> Result<(), HostError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(NAMESPACES).map_err(storage_err)?;
            table.insert(name, oid).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)
    }

    pub fn remove_namespace(&self, name: &str) -> Result<(), HostError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(NAMESPACES).map_err(storage_err)?;
            table.remove(name).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)
    }

    pub fn put_relation(&self, info: &RelationInfo) -> Result<(), HostError> {
        let bytes = encode_relation(info);
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(RELATIONS).map_err(storage_err)?;
            table.insert(info.oid, bytes.as_slice()).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)
    }

    /// Remove a relation together with all of its rows.
    pub fn remove_relation(&self, relid: Oid) -> Result<(), HostError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut relations = write_txn.open_table(RELATIONS).map_err(storage_err)?;
            relations.remove(relid).map_err(storage_err)?;

            let mut heap = write_txn.open_table(HEAP).map_err(storage_err)?;
            let mut keys = Vec::new();
            for entry in heap
                .range((relid, 0u64)..=(relid, u64::MAX))
                .map_err(storage_err)?
            {
                let (key, _) = entry.map_err(storage_err)?;
                keys.push(key.value());
            }
            for key in keys {
                heap.remove(key).map_err(storage_err)?;
            }
        }
        write_txn.commit().map_err(storage_err)
    }

    /// Apply one transaction's heap changes atomically. Changes to relations
    /// dropped since the transaction wrote them are discarded.
    pub fn apply(&self, changes: &[HeapChange]) -> Result<(), HostError> {
        if changes.is_empty() {
            return Ok(());
        }
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let relations = write_txn.open_table(RELATIONS).map_err(storage_err)?;
            let mut heap = write_txn.open_table(HEAP).map_err(storage_err)?;
            let mut dropped = Vec::new();
            for change in changes {
                let relid = change.relid();
                if dropped.contains(&relid) {
                    continue;
                }
                if relations.get(relid).map_err(storage_err)?.is_none() {
                    debug!(relid, "discarding changes to a dropped relation");
                    dropped.push(relid);
                    continue;
                }
                match change {
                    HeapChange::Insert { relid, tid, values } => {
                        let bytes = encode_row(values);
                        heap.insert((*relid, tid.0), bytes.as_slice())
                            .map_err(storage_err)?;
                    }
                    HeapChange::Delete { relid, tid } => {
                        heap.remove((*relid, tid.0)).map_err(storage_err)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(storage_err)
    }
}

// ── Encoding ────────────────────────────────────────────────────────
//
// relation: [namespace u32][pk u16, 0 = none][name][natts u16]
//           then per attribute [not_null u8][name]
// row:      [natts u16] then per value [present u8][bytes] (absent = NULL)
// strings and byte values are [len u32][bytes]; all integers little endian.

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn encode_relation(info: &RelationInfo) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&info.namespace.to_le_bytes());
    out.extend_from_slice(&info.primary_key.unwrap_or(0).to_le_bytes());
    put_bytes(&mut out, info.name.as_bytes());
    out.extend_from_slice(&(info.desc.natts() as u16).to_le_bytes());
    for attr in info.desc.attrs() {
        out.push(attr.not_null as u8);
        put_bytes(&mut out, attr.name.as_bytes());
    }
    out
}

fn encode_row(values: &[Option<Datum>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(values.len() as u16).to_le_bytes());
    for value in values {
        match value {
            Some(d) => {
                out.push(1);
                put_bytes(&mut out, d.as_bytes());
            }
            None => out.push(0),
        }
    }
    out
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], HostError> {
        if self.buf.len() < n {
            return Err(HostError::Storage("truncated record".to_string()));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, HostError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, HostError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, HostError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bytes(&mut self) -> Result<&'a [u8], HostError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, HostError> {
        String::from_utf8(self.bytes()?.to_vec()).map_err(storage_err)
    }
}

fn decode_relation(oid: Oid, buf: &[u8]) -> Result<RelationInfo, HostError> {
    let mut r = Reader { buf };
    let namespace = r.u32()?;
    let pk = r.u16()?;
    let name = r.string()?;
    let natts = r.u16()?;
    let mut attrs = Vec::with_capacity(natts as usize);
    for _ in 0..natts {
        let not_null = r.u8()? != 0;
        attrs.push(Attribute {
            name: r.string()?,
            not_null,
        });
    }
    Ok(RelationInfo {
        oid,
        name,
        namespace,
        desc: TupleDesc::new(attrs),
        primary_key: (pk != 0).then_some(pk),
    })
}

fn decode_row(buf: &[u8]) -> Result<Vec<Option<Datum>>, HostError> {
    let mut r = Reader { buf };
    let natts = r.u16()?;
    let mut values = Vec::with_capacity(natts as usize);
    for _ in 0..natts {
        values.push(match r.u8()? {
            0 => None,
            _ => Some(Datum::from_bytes(r.bytes()?)),
        });
    }
    Ok(values)
}
