//! Error taxonomy for the ingestion pipeline.
//!
//! Two families exist and they never mix:
//!
//! - [`ShardError`]: something is wrong with one input shard. Caught and logged at the
//!   merge-loop boundary; the shard is skipped or abandoned and the run continues.
//! - Output failures (unwritable destination, disk full). These surface as
//!   [`StreamError::Sink`] inside a shard and are re-raised as fatal `anyhow` errors
//!   that terminate the run.
//!
//! Schema overflow (a field missing from the frozen schema) is not an error at all; it
//! is counted in [`crate::tabular::TabularStats::dropped_fields`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure while streaming records out of one source.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The source could not be read (I/O error, truncated archive, invalid UTF-8).
    #[error("read failed after {records} records: {source}")]
    Read {
        records: u64,
        #[source]
        source: io::Error,
    },

    /// The source is not well-formed JSON at the reported position.
    #[error("malformed JSON after {records} records{}: {source}", line_suffix(*line))]
    Parse {
        records: u64,
        line: Option<u64>,
        #[source]
        source: serde_json::Error,
    },

    /// A record was valid JSON but not an object.
    #[error("record #{index}{} is not a JSON object", line_suffix(*line))]
    NotAnObject { index: u64, line: Option<u64> },

    /// The source does not start with `[` or `{`.
    #[error("unrecognised top-level JSON shape")]
    Unrecognised,

    /// The destination rejected a write. Always fatal.
    #[error("output write failed: {0}")]
    Sink(#[source] io::Error),
}

fn line_suffix(line: Option<u64>) -> String {
    line.map(|l| format!(" (line {l})")).unwrap_or_default()
}

impl StreamError {
    /// Records delivered to the sink before the failure.
    #[must_use]
    pub fn records_before(&self) -> u64 {
        match self {
            Self::Read { records, .. } | Self::Parse { records, .. } => *records,
            Self::NotAnObject { index, .. } => index.saturating_sub(1),
            Self::Unrecognised | Self::Sink(_) => 0,
        }
    }

    /// Whether this failure belongs to the destination rather than the source.
    #[must_use]
    pub fn is_sink(&self) -> bool {
        matches!(self, Self::Sink(_))
    }

    /// Classify a `serde_json` failure raised while pulling from `records` records in.
    pub(crate) fn from_json(err: serde_json::Error, records: u64, line: Option<u64>) -> Self {
        if err.is_io() {
            Self::Read {
                records,
                source: err.into(),
            }
        } else {
            Self::Parse {
                records,
                line,
                source: err,
            }
        }
    }
}

/// A shard-level failure. Never fatal to the run.
#[derive(Debug, Error)]
pub enum ShardError {
    /// First significant character is neither `[` nor `{`. The shard is skipped.
    #[error("shard {} has an unrecognised format (first character {found:?})", path.display())]
    Classification { path: PathBuf, found: Option<char> },

    /// The shard could not be opened at all.
    #[error("cannot open shard {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    /// Reading or parsing failed part-way. Records already emitted are kept.
    #[error("shard {} abandoned: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: StreamError,
    },
}

impl ShardError {
    /// Path of the offending shard.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Classification { path, .. } | Self::Open { path, .. } | Self::Read { path, .. } => {
                path
            }
        }
    }
}
