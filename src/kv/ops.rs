use tracing::debug;

use crate::engine::{Datum, HeapTuple, LockMode, Strategy};
use crate::error::KvError;
use crate::host::Host;
use crate::kv::list::ListFormatter;
use crate::kv::relation::RelationGuard;
use crate::kv::resolve::store_relation_oid;
use crate::kv::scan::StoreScan;
use crate::kv::{KEY_ATTNO, VALUE_ATTNO, mutate, tuple};

fn key_does_not_exist() -> KvError {
    KvError::NotFound("key does not exist".to_string())
}

fn column(tuple: &HeapTuple, attno: u16) -> &[u8] {
    tuple.attr(attno).map(Datum::as_bytes).unwrap_or_default()
}

/// Store `value` under `key`. Fails with a unique violation if the key is
/// already present.
pub fn set(host: &dyn Host, key: Option<&Datum>, value: Option<&Datum>) -> Result<(), KvError> {
    let (key, value) = tuple::require_pair(key, value)?;
    let relid = store_relation_oid(host)?;
    let rel = RelationGuard::open(host, relid, LockMode::RowExclusive)?;

    let mut slot = tuple::build_row(&rel, key, value)?;
    let tid = mutate::insert(&rel, &mut slot)?;
    debug!(key = %key.to_text(), %tid, "set");
    Ok(())
}

/// The value stored under `key`.
pub fn get(host: &dyn Host, key: Option<&Datum>) -> Result<Datum, KvError> {
    let key = tuple::require_key(key)?;
    let relid = store_relation_oid(host)?;
    let rel = RelationGuard::open(host, relid, LockMode::AccessShare)?;

    let mut scan = StoreScan::begin(&rel, Strategy::Equal, key.clone())?;
    let Some(found) = scan.next()? else {
        return Err(key_does_not_exist());
    };
    debug!(key = %key.to_text(), tid = %found.tid, "get");
    Ok(Datum::from_bytes(column(&found, VALUE_ATTNO)))
}

/// Remove `key` from the store.
pub fn del(host: &dyn Host, key: Option<&Datum>) -> Result<(), KvError> {
    let key = tuple::require_key(key)?;
    let relid = store_relation_oid(host)?;
    let rel = RelationGuard::open(host, relid, LockMode::RowExclusive)?;

    let mut scan = StoreScan::begin(&rel, Strategy::Equal, key.clone())?;
    let Some(found) = scan.next()? else {
        return Err(key_does_not_exist());
    };
    mutate::delete(&scan, found.tid)?;
    debug!(key = %key.to_text(), tid = %found.tid, "del");
    Ok(())
}

/// Every entry whose key starts with `prefix`, formatted as
/// `[k1 = v1, k2 = v2]`. A NULL prefix lists everything. Order is heap order.
pub fn list(host: &dyn Host, prefix: Option<&Datum>) -> Result<Datum, KvError> {
    let prefix = prefix.map(Datum::as_bytes).unwrap_or_default();
    let relid = store_relation_oid(host)?;
    let rel = RelationGuard::open(host, relid, LockMode::AccessShare)?;

    let mut formatter = ListFormatter::new(prefix);
    let mut scan = StoreScan::begin(&rel, Strategy::GreaterEqual, Datum::from_bytes(prefix))?;
    let mut scanned = 0usize;
    while let Some(row) = scan.next()? {
        scanned += 1;
        formatter.push(column(&row, KEY_ATTNO), column(&row, VALUE_ATTNO));
    }
    debug!(
        prefix = %String::from_utf8_lossy(prefix),
        scanned,
        matched = formatter.entries(),
        "list"
    );
    Ok(formatter.finish())
}
