//! NDJSON to JSON array reframing.
//!
//! The merged NDJSON stream is turned into one syntactically valid JSON array without
//! parsing it: `[`, then each line as an element with `,` separators, then `]`. Only the
//! current line is buffered, so the output can be arbitrarily larger than memory.
//!
//! The input must hold exactly one complete JSON object per line, which is what
//! [`crate::merge`] produces.

use crate::io::artifact::ArtifactWriter;
use crate::io::open_source;
use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::info;

/// Wrap NDJSON read from `reader` into a JSON array written to `writer`.
///
/// Blank lines are not elements. Each element is written on its own line:
///
/// ```text
/// [
/// {"a":1},
/// {"a":2}
/// ]
/// ```
///
/// With no elements the output is `[]`.
///
/// # Returns
/// The number of elements written.
///
/// # Errors
/// Returns an error if reading the input or writing the output fails.
pub fn wrap_ndjson<R: BufRead, W: Write>(mut reader: R, mut writer: W) -> Result<u64> {
    let mut buf = String::new();
    let mut elements = 0u64;
    writer.write_all(b"[").context("write array opening")?;
    loop {
        buf.clear();
        let n = reader
            .read_line(&mut buf)
            .with_context(|| format!("read NDJSON line after {elements} elements"))?;
        if n == 0 {
            break;
        }
        let line = buf.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }
        let sep: &[u8] = if elements == 0 { b"\n" } else { b",\n" };
        writer
            .write_all(sep)
            .and_then(|()| writer.write_all(line.as_bytes()))
            .with_context(|| format!("write array element #{}", elements + 1))?;
        elements += 1;
    }
    let close: &[u8] = if elements == 0 { b"]\n" } else { b"\n]\n" };
    writer.write_all(close).context("write array closing")?;
    writer.flush().context("flush wrapped array")?;
    Ok(elements)
}

/// Wrap the NDJSON artifact at `input` into a JSON array artifact at `output`.
///
/// # Errors
/// Returns an error if either file cannot be opened, read, written or committed.
pub fn wrap_file(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<u64> {
    let (input, output) = (input.as_ref(), output.as_ref());
    let reader = BufReader::new(open_source(input)?);
    let mut artifact = ArtifactWriter::create(output)?;
    let elements = wrap_ndjson(reader, &mut artifact)
        .with_context(|| format!("wrap {} into {}", input.display(), output.display()))?;
    artifact.commit()?;
    info!(input = %input.display(), output = %output.display(), elements, "wrapped NDJSON into JSON array");
    Ok(elements)
}
