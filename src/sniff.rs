//! Shard format detection.
//!
//! A shard is either one top-level JSON array of objects or newline-delimited JSON
//! objects. The two are told apart by the first non-whitespace byte; nothing else about
//! the content is inspected and nothing is consumed from the caller's point of view.

use crate::io::compression::auto_detect_reader;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Top-level shape of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardFormat {
    /// `[ {...}, {...} ]`
    Array,
    /// One JSON object per line.
    Lines,
    /// Anything else, including empty content.
    Unknown,
}

impl ShardFormat {
    /// Classify by the first significant byte of a shard.
    #[must_use]
    pub fn from_first_byte(byte: Option<u8>) -> Self {
        match byte {
            Some(b'[') => Self::Array,
            Some(b'{') => Self::Lines,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ShardFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Array => "array",
            Self::Lines => "lines",
            Self::Unknown => "unknown",
        })
    }
}

/// How the merger decides a shard's format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatHint {
    /// Sniff every shard.
    #[default]
    Auto,
    /// Treat every shard as a JSON array.
    Array,
    /// Treat every shard as NDJSON.
    Lines,
}

impl FromStr for FormatHint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "array" | "json" => Ok(Self::Array),
            "lines" | "jsonl" | "ndjson" => Ok(Self::Lines),
            other => anyhow::bail!("unknown format {other:?} (expected auto, array or lines)"),
        }
    }
}

impl FormatHint {
    /// Forced format, if any.
    #[must_use]
    pub fn forced(self) -> Option<ShardFormat> {
        match self {
            Self::Auto => None,
            Self::Array => Some(ShardFormat::Array),
            Self::Lines => Some(ShardFormat::Lines),
        }
    }
}

pub(crate) const UTF8_BOM: [u8; 3] = [0xef, 0xbb, 0xbf];

/// Read forward to the first byte that is not JSON whitespace.
///
/// A leading UTF-8 byte order mark is skipped. Returns `None` for empty or
/// whitespace-only content.
///
/// # Errors
/// Propagates read errors from `reader`.
pub fn first_significant_byte<R: Read>(reader: R) -> io::Result<Option<u8>> {
    let mut offset = 0usize;
    let mut bom_matched = 0usize;
    for byte in BufReader::with_capacity(512, reader).bytes() {
        let byte = byte?;
        let in_bom = bom_matched == offset
            && offset < UTF8_BOM.len()
            && byte == UTF8_BOM[offset];
        if in_bom {
            bom_matched += 1;
        }
        offset += 1;
        if in_bom || matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
            continue;
        }
        return Ok(Some(byte));
    }
    Ok(None)
}

/// Classify a seekable stream and rewind it to the start.
///
/// # Errors
/// Propagates read and seek errors.
pub fn sniff<R: Read + Seek>(reader: &mut R) -> io::Result<ShardFormat> {
    let start = reader.stream_position()?;
    let first = first_significant_byte(&mut *reader);
    reader.seek(SeekFrom::Start(start))?;
    Ok(classify(first?, &"stream"))
}

/// Map the first significant byte to a format, warning on [`ShardFormat::Unknown`].
fn classify(first: Option<u8>, shard: &dyn fmt::Display) -> ShardFormat {
    let format = ShardFormat::from_first_byte(first);
    if format == ShardFormat::Unknown {
        warn!(
            shard = %shard,
            first = ?first.map(char::from),
            "unrecognised shard format, expected '[' or '{{'"
        );
    }
    format
}

/// Classify a shard on disk, looking through any compression layer.
///
/// Compressed streams cannot rewind, so the file is opened, inspected and closed; the
/// caller reopens it to read. Emits a warning for [`ShardFormat::Unknown`].
///
/// # Errors
/// Returns an error if the shard cannot be opened or decompressed.
pub fn sniff_path(path: impl AsRef<Path>) -> Result<(ShardFormat, Option<u8>)> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = auto_detect_reader(file, path)
        .with_context(|| format!("setup decompression for {}", path.display()))?;
    let first = first_significant_byte(reader)
        .with_context(|| format!("read leading bytes of {}", path.display()))?;
    Ok((classify(first, &path.display()), first))
}
