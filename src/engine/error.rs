use thiserror::Error;

use crate::engine::lock::LockTag;
use crate::engine::types::{AttrNumber, ItemPointer, Oid};

/// Errors raised by the storage engine.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("duplicate key value violates unique constraint \"{relation}_pkey\"")]
    UniqueViolation { relation: String },

    #[error("null value in column \"{column}\" violates not-null constraint")]
    NotNullViolation { column: String },

    #[error("relation with OID {0} does not exist")]
    UndefinedTable(Oid),

    #[error("relation \"{0}\" does not exist")]
    UndefinedTableName(String),

    #[error("schema \"{0}\" does not exist")]
    UndefinedSchema(String),

    #[error("column \"{0}\" does not exist")]
    UndefinedColumn(String),

    #[error("schema \"{0}\" already exists")]
    DuplicateSchema(String),

    #[error("relation \"{0}\" already exists")]
    DuplicateTable(String),

    #[error("cannot drop schema \"{0}\" because other objects depend on it")]
    SchemaNotEmpty(String),

    #[error("attribute number {attno} is out of range for a tuple of {natts} columns")]
    InvalidAttribute { attno: AttrNumber, natts: usize },

    #[error("cannot materialize an empty tuple slot")]
    EmptySlot,

    #[error("canceling statement due to lock timeout on {0}")]
    LockTimeout(LockTag),

    #[error("deadlock detected while waiting for lock on {0}")]
    Deadlock(LockTag),

    #[error("canceling statement due to user request")]
    QueryCanceled,

    #[error("tuple concurrently deleted")]
    ConcurrentDelete,

    #[error("tuple already deleted by self")]
    AlreadyDeletedBySelf,

    #[error("invalid item pointer {0}")]
    InvalidItemPointer(ItemPointer),

    #[error("tuple {0} is not visible to the deleting snapshot")]
    InvisibleTuple(ItemPointer),

    #[error("no statement is active")]
    NoActiveStatement,

    #[error("current transaction is aborted, commands ignored until end of transaction block")]
    InFailedTransaction,

    #[error("storage error: {0}")]
    Storage(String),
}

impl HostError {
    /// SQLSTATE-style code identifying the error class.
    pub fn error_code(&self) -> &'static str {
        use crate::error::error_code::*;
        match self {
            HostError::UniqueViolation { .. } => UNIQUE_VIOLATION,
            HostError::NotNullViolation { .. } => NOT_NULL_VIOLATION,
            HostError::UndefinedTable(_) | HostError::UndefinedTableName(_) => UNDEFINED_TABLE,
            HostError::UndefinedSchema(_) => INVALID_SCHEMA_NAME,
            HostError::UndefinedColumn(_) => UNDEFINED_COLUMN,
            HostError::DuplicateSchema(_) => DUPLICATE_SCHEMA,
            HostError::DuplicateTable(_) => DUPLICATE_TABLE,
            HostError::SchemaNotEmpty(_) => DEPENDENT_OBJECTS_STILL_EXIST,
            HostError::LockTimeout(_) => LOCK_NOT_AVAILABLE,
            HostError::Deadlock(_) => DEADLOCK_DETECTED,
            HostError::QueryCanceled => QUERY_CANCELED,
            HostError::ConcurrentDelete => SERIALIZATION_FAILURE,
            HostError::InFailedTransaction => IN_FAILED_SQL_TRANSACTION,
            HostError::InvalidAttribute { .. }
            | HostError::EmptySlot
            | HostError::AlreadyDeletedBySelf
            | HostError::InvalidItemPointer(_)
            | HostError::InvisibleTuple(_)
            | HostError::NoActiveStatement => INTERNAL_ERROR,
            HostError::Storage(_) => IO_ERROR,
        }
    }
}

