// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! wal-inspect - Offline inspection of TSM write-ahead log segments.
//!
//! Subcommands:
//! - `list`: segment files of a WAL directory with their size and tail state
//! - `dump`: every entry of one segment, as text or JSON lines
//! - `verify`: replay a whole directory the way recovery would
//!
//! Nothing here writes to the WAL directory; it is safe to run against a
//! directory a live process is appending to.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use tsm_wal::replay::scan_segment;
use tsm_wal::segment::discover;
use tsm_wal::{replay, RecoveryMode, SegmentReader, StopReason, WalEntry};

/// Tool version string, pulled from Cargo.toml at compile time.
const VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "wal-inspect", version = VERSION, about = "Inspect TSM write-ahead log segments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// List the segment files of a WAL directory.
    List {
        /// WAL directory.
        dir: PathBuf,
    },

    /// Print every entry of one segment file.
    Dump {
        /// Segment file, e.g. `_0000000000000001.wal`.
        segment: PathBuf,

        /// Emit one JSON object per entry instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Replay every segment of a WAL directory and report the outcome.
    Verify {
        /// WAL directory.
        dir: PathBuf,

        /// Skip corrupt frames instead of stopping at the first one.
        #[arg(long)]
        skip_corrupt: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::List { dir } => list(&dir, &mut out),
        Command::Dump { segment, json } => dump(&segment, json, &mut out),
        Command::Verify { dir, skip_corrupt } => {
            let mode = if skip_corrupt {
                RecoveryMode::SkipCorrupt
            } else {
                RecoveryMode::Strict
            };
            verify(&dir, mode, &mut out)
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn list(dir: &Path, out: &mut impl Write) -> Result<()> {
    let segments = discover(dir)
        .with_context(|| format!("failed to read WAL directory {}", dir.display()))?;

    writeln!(
        out,
        "{:<24} {:>12} {:>8} {:<16} MODIFIED",
        "SEGMENT", "BYTES", "FRAMES", "TAIL"
    )?;

    for segment in &segments {
        let scan = scan_segment(&segment.path)
            .with_context(|| format!("failed to scan {}", segment.path.display()))?;
        let tail = if scan.is_clean() {
            "clean".to_string()
        } else if scan.is_corrupt() {
            format!("corrupt at {}", scan.valid_len)
        } else {
            format!("torn at {}", scan.valid_len)
        };
        let modified = fs::metadata(&segment.path)
            .and_then(|m| m.modified())
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|_| "-".to_string());

        writeln!(
            out,
            "{:<24} {:>12} {:>8} {:<16} {}",
            segment.name(),
            segment.file_size,
            scan.frames,
            tail,
            modified
        )?;
    }

    writeln!(out, "{} segment(s)", segments.len())?;
    Ok(())
}

fn dump(path: &Path, json: bool, out: &mut impl Write) -> Result<()> {
    let mut reader = SegmentReader::open(path)
        .with_context(|| format!("failed to open segment {}", path.display()))?;

    let mut entries = 0u64;
    while reader.advance() {
        let offset = reader.frame_offset();
        match reader.read() {
            Ok(entry) if json => {
                let line = serde_json::json!({ "offset": offset, "entry": entry });
                writeln!(out, "{line}")?;
                entries += 1;
            }
            Ok(entry) => {
                write_entry(out, offset, &entry)?;
                entries += 1;
            }
            Err(err) if json => {
                let line = serde_json::json!({ "offset": offset, "error": err.to_string() });
                writeln!(out, "{line}")?;
            }
            Err(err) => {
                warn!(offset, error = %err, "Undecodable WAL entry");
                writeln!(out, "{offset:>10}  <malformed: {err}>")?;
            }
        }
    }

    let stop = describe_stop(reader.stop_reason());
    if json {
        debug!(entries, stop = %stop, "Finished segment dump");
    } else {
        writeln!(out, "-- {entries} entries, {stop}")?;
    }
    Ok(())
}

fn verify(dir: &Path, mode: RecoveryMode, out: &mut impl Write) -> Result<()> {
    let segments = discover(dir)
        .with_context(|| format!("failed to read WAL directory {}", dir.display()))?;
    let total = segments.len();

    let mut replay = replay(segments, mode);
    let mut writes = 0u64;
    let mut deletes = 0u64;
    let mut failure = None;

    for result in replay.by_ref() {
        match result {
            Ok(WalEntry::Write(_)) => writes += 1,
            Ok(WalEntry::Delete(_)) => deletes += 1,
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    let stats = replay.stats();
    writeln!(out, "segments read:   {}/{}", stats.segments, total)?;
    writeln!(out, "write entries:   {writes}")?;
    writeln!(out, "delete entries:  {deletes}")?;
    writeln!(out, "torn tails:      {}", stats.torn_tails)?;
    writeln!(out, "skipped frames:  {}", stats.skipped_frames)?;

    match failure {
        Some(err) => Err(anyhow::Error::new(err).context("WAL replay failed")),
        None => {
            writeln!(out, "ok")?;
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn write_entry(out: &mut impl Write, offset: u64, entry: &WalEntry) -> io::Result<()> {
    match entry {
        WalEntry::Write(write) => {
            writeln!(
                out,
                "{offset:>10}  WRITE   {} key(s), {} value(s)",
                write.values.len(),
                write.value_count()
            )?;
            for (key, values) in &write.values {
                match (values.first(), values.last()) {
                    (Some(first), Some(last)) => writeln!(
                        out,
                        "{:>10}    {key}  {:?} x{}  {} .. {}",
                        "",
                        first.kind(),
                        values.len(),
                        render_timestamp(first.timestamp),
                        render_timestamp(last.timestamp)
                    )?,
                    _ => writeln!(out, "{:>10}    {key}  (no values)", "")?,
                }
            }
        }
        WalEntry::Delete(delete) => {
            write!(out, "{offset:>10}  DELETE  {}", delete.keys.join(", "))?;
            match delete.range {
                Some(range) => writeln!(
                    out,
                    "  [{} .. {}]",
                    render_timestamp(range.min),
                    render_timestamp(range.max)
                )?,
                None => writeln!(out)?,
            }
        }
    }
    Ok(())
}

/// Render a nanosecond epoch timestamp as RFC 3339.
fn render_timestamp(nanos: i64) -> String {
    DateTime::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn describe_stop(stop: Option<&StopReason>) -> String {
    match stop {
        None | Some(StopReason::EndOfSegment) => "clean end of segment".to_string(),
        Some(StopReason::TornFrame { offset }) => format!("torn frame at offset {offset}"),
        Some(StopReason::ChecksumMismatch {
            offset,
            expected,
            actual,
        }) => format!(
            "checksum mismatch at offset {offset} (expected {expected:#010x}, got {actual:#010x})"
        ),
        Some(StopReason::OversizedFrame { offset, length }) => {
            format!("oversized frame at offset {offset} ({length} bytes)")
        }
        Some(StopReason::Io(err)) => format!("I/O error: {err}"),
    }
}
