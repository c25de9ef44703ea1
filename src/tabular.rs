//! Schema-aligned delimited output (pass 2).
//!
//! Every record becomes one row with exactly one cell per schema field, in schema
//! order. Absent and `null` fields are empty cells; fields the schema does not know are
//! dropped and counted. The header is written once, first, when the writer is created.
//!
//! A schema with no fields is rejected: every row would be a blank line, and delimited
//! readers skip blank lines, so the rows could not be told apart from no rows at all.
//!
//! Cell text:
//! - strings are written raw (quoting is left to the `csv` writer)
//! - numbers and booleans use their JSON spelling
//! - nested arrays and objects are written as compact JSON

use crate::corpus::Corpus;
use crate::io::artifact::ArtifactWriter;
use crate::io::stream_artifact;
use crate::merge::{MergeOptions, MergeStats, RecordSink, StreamMerger};
use crate::schema::Schema;
use anyhow::{Context, Result, bail};
use csv::{Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

/// Formatting options for the tabular artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabularOptions {
    /// Field delimiter (a single ASCII byte).
    pub delimiter: u8,
}

impl Default for TabularOptions {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl TabularOptions {
    /// Options with the given delimiter character.
    ///
    /// # Errors
    /// Returns an error unless `delimiter` is a single ASCII character other than a
    /// quote or line break.
    pub fn with_delimiter(delimiter: char) -> Result<Self> {
        if !delimiter.is_ascii() || matches!(delimiter, '"' | '\n' | '\r') {
            bail!("delimiter must be a single ASCII character other than '\"' or a newline, got {delimiter:?}");
        }
        Ok(Self {
            delimiter: delimiter as u8,
        })
    }
}

/// Shape of a finished tabular artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabularStats {
    /// Data rows written (header excluded).
    pub rows: u64,
    /// Cells per row.
    pub columns: usize,
    /// Field occurrences dropped because the schema did not contain them.
    pub dropped_fields: u64,
}

/// Streaming, schema-aligned row writer.
pub struct TabularWriter<W: Write> {
    writer: csv::Writer<W>,
    schema: Schema,
    row: Vec<String>,
    stats: TabularStats,
}

impl<W: Write> TabularWriter<W> {
    /// Create a writer and emit the header row.
    ///
    /// # Errors
    /// Returns an error if the schema has no fields or the header cannot be written.
    pub fn new(writer: W, schema: Schema, options: TabularOptions) -> Result<Self> {
        if schema.is_empty() {
            bail!("schema has no fields (every record is empty); a tabular artifact needs at least one column");
        }
        let mut writer = WriterBuilder::new()
            .delimiter(options.delimiter)
            .terminator(Terminator::Any(b'\n'))
            .has_headers(false)
            .from_writer(writer);
        writer
            .write_record(schema.fields())
            .context("write tabular header")?;
        let columns = schema.len();
        Ok(Self {
            writer,
            row: vec![String::new(); columns],
            schema,
            stats: TabularStats {
                columns,
                ..TabularStats::default()
            },
        })
    }

    /// Write one record as a row.
    ///
    /// # Errors
    /// Returns an error if the row cannot be written.
    pub fn write(&mut self, record: &Map<String, Value>) -> io::Result<()> {
        for cell in &mut self.row {
            cell.clear();
        }
        for (key, value) in record {
            match self.schema.position(key) {
                Some(idx) => render_cell(value, &mut self.row[idx]),
                None => self.stats.dropped_fields += 1,
            }
        }
        self.writer.write_record(&self.row)?;
        self.stats.rows += 1;
        Ok(())
    }

    /// Statistics so far.
    #[must_use]
    pub fn stats(&self) -> TabularStats {
        self.stats
    }

    /// Flush and hand back the underlying writer.
    ///
    /// # Errors
    /// Returns an error if buffered rows cannot be flushed.
    pub fn finish(self) -> Result<(W, TabularStats)> {
        let stats = self.stats;
        let inner = self
            .writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flush tabular output: {}", e.error()))?;
        Ok((inner, stats))
    }
}

impl<W: Write> RecordSink for TabularWriter<W> {
    fn accept(&mut self, record: &Map<String, Value>, _line: Option<&str>) -> io::Result<()> {
        self.write(record)
    }

    fn end_shard(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

fn render_cell(value: &Value, cell: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => cell.push_str(s),
        Value::Bool(b) => cell.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => cell.push_str(&n.to_string()),
        nested @ (Value::Array(_) | Value::Object(_)) => cell.push_str(&nested.to_string()),
    }
}

/// Write the tabular artifact for a merged artifact (NDJSON or wrapped array).
///
/// # Errors
/// Returns an error if the input cannot be read in full or the output cannot be written.
pub fn tabulate_artifact(
    input: impl AsRef<Path>,
    schema: &Schema,
    output: impl AsRef<Path>,
    options: TabularOptions,
) -> Result<TabularStats> {
    let (input, output) = (input.as_ref(), output.as_ref());
    let mut writer = TabularWriter::new(ArtifactWriter::create(output)?, schema.clone(), options)?;
    stream_artifact(input, |record, _| writer.write(record))
        .with_context(|| format!("tabulate {} into {}", input.display(), output.display()))?;
    let (artifact, stats) = writer.finish()?;
    artifact.commit()?;
    info!(
        input = %input.display(),
        output = %output.display(),
        rows = stats.rows,
        columns = stats.columns,
        dropped_fields = stats.dropped_fields,
        "tabular artifact written"
    );
    Ok(stats)
}

/// Write the tabular artifact straight from the shards.
///
/// Shard failures follow the merge policy, so the rows match what a merge of the same
/// corpus would produce.
///
/// # Errors
/// Returns an error if the output cannot be written or committed.
pub fn tabulate_corpus(
    corpus: &Corpus,
    schema: &Schema,
    output: impl AsRef<Path>,
    merge: MergeOptions,
    options: TabularOptions,
) -> Result<(TabularStats, MergeStats)> {
    let output = output.as_ref();
    let writer = TabularWriter::new(ArtifactWriter::create(output)?, schema.clone(), options)?;
    let mut merger = StreamMerger::new(writer, merge);
    let merge_stats = merger.fold(corpus)?;
    let (artifact, stats) = merger.into_sink().finish()?;
    artifact.commit()?;
    Ok((stats, merge_stats))
}
