use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which snapshot a statement reads through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// A fresh snapshot for every statement.
    #[default]
    ReadCommitted,
    /// One snapshot for the whole transaction.
    RepeatableRead,
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "read-committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable-read" => Ok(IsolationLevel::RepeatableRead),
            other => Err(format!("unknown isolation level: {other}")),
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "read-committed"),
            IsolationLevel::RepeatableRead => write!(f, "repeatable-read"),
        }
    }
}

/// Engine configuration.
///
/// With no `db_path` the engine keeps everything in memory; otherwise the
/// catalog and committed rows are persisted in a redb file at that path.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub db_path: Option<PathBuf>,

    /// Longest a statement waits for a relation lock or for another
    /// transaction to finish. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,

    pub isolation: IsolationLevel,
}

impl EngineConfig {
    /// Set the lock timeout from a millisecond count; 0 waits indefinitely.
    pub fn with_lock_timeout_ms(self, ms: u64) -> Self {
        Self {
            lock_timeout: (ms > 0).then(|| Duration::from_millis(ms)),
            ..self
        }
    }

    /// The database path, falling back to `pgkv.redb` in the working directory.
    pub fn resolve_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("pgkv.redb"))
    }
}
