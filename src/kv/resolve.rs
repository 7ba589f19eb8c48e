use crate::engine::Oid;
use crate::error::KvError;
use crate::host::Host;

pub const STORE_SCHEMA: &str = "pgkv";
pub const STORE_TABLE: &str = "store";

/// Look up the OID of `pgkv.store`.
///
/// Done once per operation: the table may have been dropped and recreated
/// since the previous statement.
pub fn store_relation_oid(host: &dyn Host) -> Result<Oid, KvError> {
    let namespace = host.namespace_oid(STORE_SCHEMA).ok_or_else(|| {
        KvError::Configuration(format!("schema \"{STORE_SCHEMA}\" does not exist"))
    })?;
    host.relation_oid(STORE_TABLE, namespace).ok_or_else(|| {
        KvError::Configuration(format!(
            "relation \"{STORE_SCHEMA}.{STORE_TABLE}\" does not exist"
        ))
    })
}
