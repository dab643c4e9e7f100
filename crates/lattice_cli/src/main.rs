//! Lattice CLI
//!
//! The line-oriented protocol used by external tooling, plus maintenance
//! commands.
//!
//! # Protocol commands
//!
//! Each prints exactly one JSON object on stdout; diagnostics go to stderr.
//!
//! - `init <path>` - Create an empty lattice
//! - `write <path> <key> <value>` - Store a value (chunked when oversize)
//! - `read <path> <key>` - Newest value under a key
//! - `get <path> <id>` - One record by id
//! - `search <path> <prefix> [limit]` - Prefix query
//! - `daemon <path>` - JSON request/response loop on stdin/stdout
//!
//! # Maintenance commands
//!
//! - `inspect` - Sizes, counts and tier
//! - `verify` - Check snapshot, WAL and chunk integrity
//! - `dump-wal` - List WAL entries
//! - `checkpoint` - Consolidate the WAL into the snapshot

mod commands;
mod error;
mod ops;

use clap::{Parser, Subcommand};
use error::{CliError, CliResult};
use lattice_core::{Config, Lattice, DEFAULT_MAX_NODES};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Lattice command-line tools.
#[derive(Parser)]
#[command(name = "lattice")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Physical capacity in records
    #[arg(global = true, long, env = "LATTICE_MAX_NODES", default_value_t = DEFAULT_MAX_NODES)]
    max_nodes: u64,

    /// Signed license key (base64)
    #[arg(global = true, long, env = "LATTICE_LICENSE_KEY", hide_env_values = true)]
    license_key: Option<String>,

    /// Push every WAL entry to durable storage immediately
    #[arg(global = true, long)]
    sync: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty lattice
    Init {
        /// Snapshot path
        path: PathBuf,
    },

    /// Store a value under a key
    Write {
        /// Snapshot path
        path: PathBuf,
        /// Node name
        key: String,
        /// Value (UTF-8)
        value: String,
        /// Node kind: primitive, pattern, learning, anti-pattern or a number
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Read the newest value under a key
    Read {
        /// Snapshot path
        path: PathBuf,
        /// Node name
        key: String,
    },

    /// Fetch one record by id
    Get {
        /// Snapshot path
        path: PathBuf,
        /// Node id
        id: u64,
    },

    /// Newest record per name under a prefix
    Search {
        /// Snapshot path
        path: PathBuf,
        /// Name prefix
        prefix: String,
        /// Maximum results
        #[arg(default_value_t = 10)]
        limit: usize,
    },

    /// Serve JSON requests on stdin, one per line
    Daemon {
        /// Snapshot path
        path: PathBuf,
    },

    /// Display sizes, counts and tier
    Inspect {
        /// Snapshot path
        path: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify snapshot, WAL and chunk integrity
    Verify {
        /// Snapshot path
        path: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump WAL entries for debugging
    DumpWal {
        /// Snapshot path
        path: PathBuf,

        /// Maximum number of entries to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Start from this offset
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a snapshot and truncate the WAL
    Checkpoint {
        /// Snapshot path
        path: PathBuf,
    },

    /// Show version information
    Version,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::default()
            .max_nodes(self.max_nodes)
            .sync_on_write(self.sync);
        if let Some(key) = &self.license_key {
            config = config.license_key(key.clone());
        }
        config
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints one protocol response line and maps it to an exit code.
fn emit(result: CliResult<Value>) -> ExitCode {
    match result {
        Ok(response) => {
            println!("{response}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("{}", ops::error_response(&err));
            ExitCode::FAILURE
        }
    }
}

fn open_existing(path: &Path, config: Config) -> CliResult<Lattice> {
    Ok(Lattice::open(path, config.create_if_missing(false))?)
}

fn init(path: &Path, config: Config) -> CliResult<Value> {
    let lattice = Lattice::open(path, config)?;
    lattice.checkpoint()?;
    Ok(json!({
        "ok": true,
        "path": path.display().to_string(),
        "node_count": lattice.node_count(),
        "tier": lattice.tier().to_string(),
    }))
}

fn checkpoint(path: &Path, config: Config) -> CliResult<Value> {
    let lattice = open_existing(path, config)?;
    lattice.checkpoint()?;
    Ok(json!({
        "ok": true,
        "op": "checkpoint",
        "node_count": lattice.node_count(),
    }))
}

fn report(result: Result<(), Box<dyn std::error::Error>>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cli.config();

    match cli.command {
        Commands::Init { path } => emit(init(&path, config)),
        Commands::Write {
            path,
            key,
            value,
            kind,
        } => emit(ops::parse_kind(kind.as_deref()).and_then(|kind| {
            let lattice = Lattice::open(&path, config)?;
            ops::write(&lattice, &key, value.as_bytes(), kind, false)
        })),
        Commands::Read { path, key } => {
            emit(open_existing(&path, config).and_then(|l| ops::read(&l, &key)))
        }
        Commands::Get { path, id } => {
            emit(open_existing(&path, config).and_then(|l| ops::get(&l, id)))
        }
        Commands::Search {
            path,
            prefix,
            limit,
        } => emit(open_existing(&path, config).and_then(|l| ops::search(&l, &prefix, limit))),
        Commands::Daemon { path } => match commands::daemon::run(&path, config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => emit(Err(err)),
        },
        Commands::Inspect { path, format } => report(commands::inspect::run(
            &path,
            cli.max_nodes,
            cli.license_key.as_deref(),
            &format,
        )),
        Commands::Verify { path, format } => {
            report(commands::verify::run(&path, cli.max_nodes, &format))
        }
        Commands::DumpWal {
            path,
            limit,
            offset,
            format,
        } => report(commands::dump_wal::run(&path, limit, offset, &format)),
        Commands::Checkpoint { path } => emit(checkpoint(&path, config)),
        Commands::Version => {
            println!("lattice CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("lattice core v{}", lattice_core::VERSION);
            ExitCode::SUCCESS
        }
    }
}
