//! Streaming I/O building blocks.
//!
//! - [`compression`]: transparent codec detection for shards and artifacts
//! - [`artifact`]: write-then-rename output files
//! - [`jsonl`]: line-delimited record streaming
//! - [`array`]: element-at-a-time streaming of a top-level JSON array
//!
//! Every record reader hands records to a callback one at a time and never collects
//! them; the callback's error type is `std::io::Error` because every sink in this crate
//! ultimately writes bytes somewhere.

pub mod array;
pub mod artifact;
pub mod compression;
pub mod jsonl;

use crate::error::StreamError;
use crate::sniff::{ShardFormat, UTF8_BOM, first_significant_byte};
use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// Open a file for reading through any compression layer its name or content implies.
///
/// # Errors
/// Returns an error if the file cannot be opened or its decoder cannot start.
pub fn open_source(path: impl AsRef<Path>) -> Result<Box<dyn Read>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    compression::auto_detect_reader(file, path)
        .with_context(|| format!("setup decompression for {}", path.display()))
}

/// Stream the records of `reader`, which holds content of the given `format`.
///
/// `on_record` receives each object and, for line-delimited input, the verbatim line
/// it came from. A leading UTF-8 byte order mark is dropped.
///
/// # Errors
/// See [`StreamError`]. [`ShardFormat::Unknown`] yields [`StreamError::Unrecognised`].
pub fn stream_records<R, F>(reader: R, format: ShardFormat, on_record: F) -> Result<u64, StreamError>
where
    R: Read,
    F: FnMut(&Map<String, Value>, Option<&str>) -> io::Result<()>,
{
    if format == ShardFormat::Unknown {
        return Err(StreamError::Unrecognised);
    }
    let mut reader = BufReader::new(reader);
    skip_bom(&mut reader).map_err(|source| StreamError::Read { records: 0, source })?;
    match format {
        ShardFormat::Array => array::stream_array(reader, on_record),
        _ => jsonl::stream_lines(reader, on_record),
    }
}

fn skip_bom<R: BufRead>(reader: &mut R) -> io::Result<()> {
    if reader.fill_buf()?.starts_with(&UTF8_BOM) {
        reader.consume(UTF8_BOM.len());
    }
    Ok(())
}

/// Stream the records of a finished artifact (NDJSON or wrapped array).
///
/// Unlike shards, artifacts are produced by this crate, so any failure here is fatal.
///
/// # Errors
/// Returns an error if the artifact cannot be classified, opened or fully read, or if
/// `on_record` fails.
pub fn stream_artifact<F>(path: impl AsRef<Path>, on_record: F) -> Result<u64>
where
    F: FnMut(&Map<String, Value>, Option<&str>) -> io::Result<()>,
{
    let path = path.as_ref();
    let first = first_significant_byte(open_source(path)?)
        .with_context(|| format!("read leading bytes of {}", path.display()))?;
    // An empty NDJSON artifact is a legitimate zero-record corpus.
    let Some(first) = first else {
        return Ok(0);
    };
    let format = ShardFormat::from_first_byte(Some(first));
    if format == ShardFormat::Unknown {
        bail!("{} is neither NDJSON nor a JSON array", path.display());
    }
    let reader = open_source(path)?;
    stream_records(reader, format, on_record).with_context(|| format!("stream {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(input: &[u8], format: ShardFormat) -> Result<u64, StreamError> {
        stream_records(input, format, |_, _| Ok(()))
    }

    #[test]
    fn byte_order_mark_is_ignored() -> Result<()> {
        assert_eq!(count(b"\xef\xbb\xbf[{\"a\":1}]", ShardFormat::Array)?, 1);
        assert_eq!(count(b"\xef\xbb\xbf{\"a\":1}\n{\"a\":2}\n", ShardFormat::Lines)?, 2);
        Ok(())
    }

    #[test]
    fn unknown_format_is_not_streamed() {
        assert!(matches!(count(b"[]", ShardFormat::Unknown), Err(StreamError::Unrecognised)));
    }

    #[test]
    fn empty_artifact_has_no_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.ndjson");
        std::fs::write(&path, "")?;
        assert_eq!(stream_artifact(&path, |_, _| Ok(()))?, 0);
        Ok(())
    }
}
