//! `pgkv` — run the key-value functions against a local database file.
//!
//! Usage:
//!   pgkv [--db PATH] [--lock-timeout-ms N] [--isolation LEVEL] <command>
//!
//! Each command runs as a single autocommit statement.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pgkv::{Datum, Engine, EngineConfig, IsolationLevel, KvError, extension};
use tracing::debug;

/// Key-value store on a relational heap.
#[derive(Parser, Debug)]
#[command(name = "pgkv", about = "Key-value functions over pgkv.store")]
struct Cli {
    /// Database file (default: ./pgkv.redb).
    #[arg(long = "db", global = true)]
    db: Option<PathBuf>,

    /// Give up waiting for locks after this many milliseconds (0 waits forever).
    #[arg(long = "lock-timeout-ms", global = true, default_value_t = 0)]
    lock_timeout_ms: u64,

    /// read-committed or repeatable-read.
    #[arg(long = "isolation", global = true, default_value = "read-committed")]
    isolation: IsolationLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create schema pgkv and table pgkv.store.
    Install,
    /// Drop pgkv.store and schema pgkv.
    Uninstall,
    /// Store a value under a new key.
    Set { key: String, value: String },
    /// Print the value stored under a key.
    Get { key: String },
    /// Remove a key.
    Del { key: String },
    /// Print every entry whose key starts with PREFIX.
    List { prefix: Option<String> },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = EngineConfig {
        db_path: cli.db,
        isolation: cli.isolation,
        ..Default::default()
    }
    .with_lock_timeout_ms(cli.lock_timeout_ms);
    let config = EngineConfig {
        db_path: Some(config.resolve_db_path()),
        ..config
    };
    debug!(?config, "opening database");

    let engine = Engine::open(config)
        .map_err(|e| anyhow::anyhow!("failed to open database: {}", e))?;
    let backend = engine.connect();

    let (function, args): (&str, Vec<Option<Datum>>) = match cli.command {
        Commands::Install => {
            extension::install(&backend).map_err(report)?;
            return Ok(());
        }
        Commands::Uninstall => {
            extension::uninstall(&backend).map_err(report)?;
            return Ok(());
        }
        Commands::Set { key, value } => ("pgkv.set", vec![Some(key.into()), Some(value.into())]),
        Commands::Get { key } => ("pgkv.get", vec![Some(key.into())]),
        Commands::Del { key } => ("pgkv.del", vec![Some(key.into())]),
        Commands::List { prefix } => ("pgkv.list", vec![prefix.map(Datum::from)]),
    };

    let result = backend
        .execute(|host| extension::call(host, function, &args))
        .map_err(report)?;
    if let Some(datum) = result {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(datum.as_bytes())?;
        stdout.write_all(b"\n")?;
    }

    Ok(())
}

fn report(e: KvError) -> anyhow::Error {
    anyhow::anyhow!("ERROR:  {} (SQLSTATE {})", e, e.error_code())
}
