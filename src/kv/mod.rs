//! Key-value operations over the `pgkv.store` table.
//!
//! Every operation resolves the table, opens it under the lock mode it needs,
//! and drives the host's tuple and scan primitives. Relations and scans are
//! held by guards, so they are released on every exit path.

mod list;
mod mutate;
mod ops;
mod relation;
mod resolve;
mod scan;
mod tuple;

use crate::engine::AttrNumber;

pub use list::ListFormatter;
pub use ops::{del, get, list, set};
pub use resolve::{STORE_SCHEMA, STORE_TABLE, store_relation_oid};

/// Column holding the key; the table's primary key.
pub(crate) const KEY_ATTNO: AttrNumber = 1;
/// Column holding the value.
pub(crate) const VALUE_ATTNO: AttrNumber = 2;
