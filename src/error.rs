use thiserror::Error;

use crate::engine::HostError;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, SQLSTATE-style identifiers. Callers match on these, never on
// the human-readable message.

pub mod error_code {
    pub const NULL_VALUE_NOT_ALLOWED: &str = "22004";
    pub const NO_DATA_FOUND: &str = "P0002";
    pub const UNDEFINED_OBJECT: &str = "42704";
    pub const UNDEFINED_FUNCTION: &str = "42883";
    pub const UNDEFINED_TABLE: &str = "42P01";
    pub const UNDEFINED_COLUMN: &str = "42703";
    pub const INVALID_SCHEMA_NAME: &str = "3F000";
    pub const DUPLICATE_SCHEMA: &str = "42P06";
    pub const DUPLICATE_TABLE: &str = "42P07";
    pub const DEPENDENT_OBJECTS_STILL_EXIST: &str = "2BP01";
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const NOT_NULL_VIOLATION: &str = "23502";
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const QUERY_CANCELED: &str = "57014";
    pub const IN_FAILED_SQL_TRANSACTION: &str = "25P02";
    pub const IO_ERROR: &str = "58030";
    pub const INTERNAL_ERROR: &str = "XX000";
}

// ── KvError ─────────────────────────────────────────────────────────

/// Error returned by the key-value operations.
///
/// Display is the bare message, e.g. `key does not exist`.
#[derive(Error, Debug)]
pub enum KvError {
    /// A caller argument was NULL where a value is required.
    #[error("{0}")]
    InvalidArgument(String),

    /// `get` or `del` on a key that is not in the store.
    #[error("{0}")]
    NotFound(String),

    /// The backing schema or table is not installed, or has the wrong shape.
    #[error("{0}")]
    Configuration(String),

    /// No registered function matches the name and argument count.
    #[error("function {0} does not exist")]
    UndefinedFunction(String),

    /// Raised by the storage engine (constraint violations, lock failures,
    /// cancellation, ...).
    #[error(transparent)]
    Host(#[from] HostError),
}

impl KvError {
    pub fn error_code(&self) -> &'static str {
        match self {
            KvError::InvalidArgument(_) => error_code::NULL_VALUE_NOT_ALLOWED,
            KvError::NotFound(_) => error_code::NO_DATA_FOUND,
            KvError::Configuration(_) => error_code::UNDEFINED_OBJECT,
            KvError::UndefinedFunction(_) => error_code::UNDEFINED_FUNCTION,
            KvError::Host(e) => e.error_code(),
        }
    }

    /// True when the engine rejected a write because the key already exists.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, KvError::Host(HostError::UniqueViolation { .. }))
    }
}
