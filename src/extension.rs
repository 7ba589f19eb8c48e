//! The SQL-callable surface of the extension: the function registry, call
//! dispatch and install/uninstall of the backing table.

use tracing::{debug, info};

use crate::engine::{Backend, ColumnDef, Datum, HostError};
use crate::error::KvError;
use crate::host::Host;
use crate::kv::{self, STORE_SCHEMA, STORE_TABLE};

/// Arguments of one call. `None` is SQL NULL.
pub type FunctionCallInfo<'a> = &'a [Option<Datum>];

type Handler = fn(&dyn Host, FunctionCallInfo<'_>) -> Result<Option<Datum>, KvError>;

/// A registered function.
pub struct FunctionDef {
    pub name: &'static str,
    /// Argument types, all `text`.
    pub nargs: usize,
    pub returns_void: bool,
    handler: Handler,
}

fn set(host: &dyn Host, args: FunctionCallInfo<'_>) -> Result<Option<Datum>, KvError> {
    kv::set(host, args[0].as_ref(), args[1].as_ref())?;
    Ok(None)
}

fn get(host: &dyn Host, args: FunctionCallInfo<'_>) -> Result<Option<Datum>, KvError> {
    kv::get(host, args[0].as_ref()).map(Some)
}

fn del(host: &dyn Host, args: FunctionCallInfo<'_>) -> Result<Option<Datum>, KvError> {
    kv::del(host, args[0].as_ref())?;
    Ok(None)
}

fn list(host: &dyn Host, args: FunctionCallInfo<'_>) -> Result<Option<Datum>, KvError> {
    kv::list(host, args[0].as_ref()).map(Some)
}

pub const FUNCTIONS: &[FunctionDef] = &[
    FunctionDef { name: "set", nargs: 2, returns_void: true, handler: set },
    FunctionDef { name: "get", nargs: 1, returns_void: false, handler: get },
    FunctionDef { name: "del", nargs: 1, returns_void: true, handler: del },
    FunctionDef { name: "list", nargs: 1, returns_void: false, handler: list },
];

/// Find a function by `pgkv.name` or bare `name` and argument count.
pub fn lookup(name: &str, nargs: usize) -> Option<&'static FunctionDef> {
    let bare = match name.split_once('.') {
        Some((schema, bare)) if schema == STORE_SCHEMA => bare,
        Some(_) => return None,
        None => name,
    };
    FUNCTIONS
        .iter()
        .find(|f| f.name == bare && f.nargs == nargs)
}

fn signature(name: &str, nargs: usize) -> String {
    format!("{name}({})", vec!["text"; nargs].join(", "))
}

/// Call a registered function with `args` on behalf of the current statement.
pub fn call(host: &dyn Host, name: &str, args: FunctionCallInfo<'_>) -> Result<Option<Datum>, KvError> {
    let func =
        lookup(name, args.len()).ok_or_else(|| KvError::UndefinedFunction(signature(name, args.len())))?;
    debug!(function = func.name, nargs = args.len(), "call");
    (func.handler)(host, args)
}

/// Create `pgkv.store` and its schema, skipping whatever already exists.
pub fn install(backend: &Backend) -> Result<(), KvError> {
    match backend.create_schema(STORE_SCHEMA) {
        Ok(_) | Err(HostError::DuplicateSchema(_)) => {}
        Err(e) => return Err(e.into()),
    }
    let columns = [ColumnDef::text("key"), ColumnDef::text("value").not_null()];
    match backend.create_table(STORE_SCHEMA, STORE_TABLE, &columns, Some("key")) {
        Ok(oid) => info!(oid, "installed {STORE_SCHEMA}.{STORE_TABLE}"),
        Err(HostError::DuplicateTable(_)) => {
            info!("{STORE_SCHEMA}.{STORE_TABLE} already installed")
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Drop `pgkv.store` and its schema. Waits for sessions that have it open.
pub fn uninstall(backend: &Backend) -> Result<(), KvError> {
    match backend.drop_table(STORE_SCHEMA, STORE_TABLE) {
        Ok(()) | Err(HostError::UndefinedTableName(_)) | Err(HostError::UndefinedSchema(_)) => {}
        Err(e) => return Err(e.into()),
    }
    match backend.drop_schema(STORE_SCHEMA) {
        Ok(()) | Err(HostError::UndefinedSchema(_)) => {}
        Err(e) => return Err(e.into()),
    }
    info!("uninstalled {STORE_SCHEMA}");
    Ok(())
}
