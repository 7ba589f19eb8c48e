use crate::engine::{Datum, TupleSlot};
use crate::error::KvError;
use crate::kv::relation::RelationGuard;
use crate::kv::{KEY_ATTNO, VALUE_ATTNO};

/// Both arguments of `set`, or `InvalidArgument` if either is NULL.
pub(crate) fn require_pair<'a>(
    key: Option<&'a Datum>,
    value: Option<&'a Datum>,
) -> Result<(&'a Datum, &'a Datum), KvError> {
    match (key, value) {
        (Some(key), Some(value)) => Ok((key, value)),
        _ => Err(KvError::InvalidArgument(
            "key and value must not be NULL".to_string(),
        )),
    }
}

/// The key argument of `get`/`del`, or `InvalidArgument` if NULL.
pub(crate) fn require_key(key: Option<&Datum>) -> Result<&Datum, KvError> {
    key.ok_or_else(|| KvError::InvalidArgument("key must not be NULL".to_string()))
}

/// Fill a slot of the store's row type with `(key, value)`.
///
/// The slot borrows the guard, so it cannot outlive the open relation.
pub(crate) fn build_row<'r>(
    rel: &'r RelationGuard<'_>,
    key: &Datum,
    value: &Datum,
) -> Result<TupleSlot<'r>, KvError> {
    let relation = rel.relation();
    let desc = relation.desc();
    if desc.natts() != 2 {
        return Err(KvError::Configuration(format!(
            "relation \"{}\" has {} columns, expected (key, value)",
            relation.name(),
            desc.natts()
        )));
    }

    let mut slot = TupleSlot::new(desc);
    slot.clear();
    slot.set_value(KEY_ATTNO, key.clone())?;
    slot.set_value(VALUE_ATTNO, value.clone())?;
    slot.store_virtual();
    Ok(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ColumnDef, Engine, LockMode};

    #[test]
    fn null_arguments_are_rejected() {
        let k = Datum::from("k");
        assert!(require_pair(Some(&k), Some(&k)).is_ok());
        for (key, value) in [(None, Some(&k)), (Some(&k), None), (None, None)] {
            let err = require_pair(key, value).unwrap_err();
            assert_eq!(err.to_string(), "key and value must not be NULL");
        }
        assert_eq!(require_key(None).unwrap_err().to_string(), "key must not be NULL");
    }

    #[test]
    fn builds_two_column_row() {
        let engine = Engine::in_memory();
        let backend = engine.connect();
        backend.create_schema("s").unwrap();
        let relid = backend
            .create_table("s", "t", &[ColumnDef::text("key"), ColumnDef::text("value")], Some("key"))
            .unwrap();
        let rel = RelationGuard::open(&backend, relid, LockMode::RowExclusive).unwrap();
        let slot = build_row(&rel, &"k".into(), &"v".into()).unwrap();
        assert_eq!(slot.materialize().unwrap(), vec![Some("k".into()), Some("v".into())]);
    }

    #[test]
    fn wrong_shape_is_a_configuration_error() {
        let engine = Engine::in_memory();
        let backend = engine.connect();
        backend.create_schema("s").unwrap();
        let relid = backend
            .create_table("s", "t", &[ColumnDef::text("only")], None)
            .unwrap();
        let rel = RelationGuard::open(&backend, relid, LockMode::RowExclusive).unwrap();
        let err = build_row(&rel, &"k".into(), &"v".into()).err().unwrap();
        assert!(matches!(err, KvError::Configuration(_)));
    }
}
