//! Line-delimited JSON (NDJSON) record streaming.
//!
//! # Notes
//! - One JSON object per line; empty/whitespace-only lines are skipped.
//! - The line terminator (`\n` or `\r\n`) is not part of the record text.
//! - Only the current line is held in memory; its buffer is reused across lines.
//! - A string value containing a raw newline splits its record across two lines. Neither
//!   half parses, so the shard fails at that line with [`StreamError::Parse`].

use crate::error::StreamError;
use serde_json::{Map, Value};
use std::io::{self, BufRead};

/// Stream every non-blank line of `reader` as a JSON object.
///
/// `on_record` receives the parsed object and the verbatim line text.
///
/// # Returns
/// The number of records delivered.
///
/// # Errors
/// Stops at the first unreadable line, malformed line, non-object line or sink failure.
/// The error reports how many records were delivered before it.
pub fn stream_lines<R, F>(mut reader: R, mut on_record: F) -> Result<u64, StreamError>
where
    R: BufRead,
    F: FnMut(&Map<String, Value>, Option<&str>) -> io::Result<()>,
{
    let mut buf = String::new();
    let mut records = 0u64;
    let mut line_no = 0u64;
    loop {
        buf.clear();
        let n = reader
            .read_line(&mut buf)
            .map_err(|source| StreamError::Read { records, source })?;
        if n == 0 {
            break;
        }
        line_no += 1;
        let line = buf.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .map_err(|e| StreamError::from_json(e, records, Some(line_no)))?;
        let Value::Object(object) = value else {
            return Err(StreamError::NotAnObject {
                index: records + 1,
                line: Some(line_no),
            });
        };
        on_record(&object, Some(line)).map_err(StreamError::Sink)?;
        records += 1;
    }
    Ok(records)
}
