//! Daemon command: one JSON request per stdin line, one JSON response per
//! stdout line.
//!
//! The daemon keeps one lattice open and handles requests strictly one at a
//! time. A malformed line gets an error response; only `shutdown` or end of
//! input stops the loop. Diagnostics go to stderr.

use crate::error::{CliError, CliResult};
use crate::ops;
use lattice_core::{Config, Lattice};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::path::Path;

fn default_limit() -> usize {
    10
}

/// Value-carrying fields of a write request.
#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    value_base64: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

/// One daemon request.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Store a value; chunked automatically when oversize.
    Write(WriteRequest),
    /// Store a value as a chunked payload.
    WriteChunked(WriteRequest),
    /// Read the newest value under a key.
    Read {
        /// Exact name.
        key: String,
    },
    /// Reassemble the payload stored under an id.
    ReadChunked {
        /// Node id.
        id: u64,
    },
    /// Fetch one record by id.
    Get {
        /// Node id.
        id: u64,
    },
    /// Prefix query.
    Search {
        /// Name prefix.
        prefix: String,
        /// Maximum results.
        #[serde(default = "default_limit")]
        limit: usize,
    },
    /// Flush the WAL.
    Flush,
    /// Snapshot and truncate the WAL.
    Checkpoint,
    /// Snapshot, keeping the WAL.
    Save,
    /// Counters and tier.
    Stats,
    /// Stop the daemon.
    Shutdown,
}

/// Handles one request line. Returns the response and whether to stop.
pub fn handle_line(lattice: &Lattice, line: &str) -> (Value, bool) {
    let request = match serde_json::from_str::<Request>(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "malformed request");
            return (
                ops::error_response(&CliError::BadRequest(e.to_string())),
                false,
            );
        }
    };

    let stop = matches!(request, Request::Shutdown);
    let response = dispatch(lattice, request).unwrap_or_else(|e| ops::error_response(&e));
    (response, stop)
}

fn dispatch(lattice: &Lattice, request: Request) -> CliResult<Value> {
    match request {
        Request::Write(w) => write(lattice, &w, false),
        Request::WriteChunked(w) => write(lattice, &w, true),
        Request::Read { key } => ops::read(lattice, &key),
        Request::ReadChunked { id } => ops::read_chunked(lattice, id),
        Request::Get { id } => ops::get(lattice, id),
        Request::Search { prefix, limit } => ops::search(lattice, &prefix, limit),
        Request::Flush => {
            lattice.flush()?;
            Ok(ops::ack("flush"))
        }
        Request::Checkpoint => {
            lattice.checkpoint()?;
            Ok(ops::ack("checkpoint"))
        }
        Request::Save => {
            lattice.save()?;
            Ok(ops::ack("save"))
        }
        Request::Stats => ops::stats(lattice),
        Request::Shutdown => Ok(ops::ack("shutdown")),
    }
}

fn write(lattice: &Lattice, w: &WriteRequest, force_chunked: bool) -> CliResult<Value> {
    let bytes = ops::decode_value(w.value.as_deref(), w.value_base64.as_deref())?;
    let kind = ops::parse_kind(w.kind.as_deref())?;
    ops::write(lattice, &w.key, &bytes, kind, force_chunked)
}

/// Serves requests from `input` until `shutdown` or end of input.
///
/// # Errors
///
/// Returns an error if reading input or writing output fails. Request
/// failures are reported as responses instead.
pub fn serve<R: BufRead, W: Write>(lattice: &Lattice, input: R, mut output: W) -> CliResult<()> {
    writeln!(
        output,
        "{}",
        json!({
            "ok": true,
            "ready": true,
            "version": lattice_core::VERSION,
            "node_count": lattice.node_count(),
            "tier": lattice.tier().to_string(),
        })
    )?;
    output.flush()?;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (response, stop) = handle_line(lattice, &line);
        writeln!(output, "{response}")?;
        output.flush()?;
        if stop {
            break;
        }
    }
    Ok(())
}

/// Runs the daemon command on stdin/stdout.
pub fn run(path: &Path, config: Config) -> CliResult<()> {
    let lattice = Lattice::open(path, config)?;
    tracing::info!(path = %path.display(), "daemon ready");

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(&lattice, stdin.lock(), stdout.lock())?;

    lattice.close()?;
    tracing::info!("daemon stopped");
    Ok(())
}
