pub mod config;
pub mod engine;
pub mod error;
pub mod extension;
pub mod host;
pub mod kv;

pub use config::{EngineConfig, IsolationLevel};
pub use engine::{Backend, CancelHandle, Datum, Engine, HostError};
pub use error::KvError;
pub use host::{Host, Relation};
pub use kv::{del, get, list, set};
