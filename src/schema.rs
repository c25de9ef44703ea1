//! Schema discovery (pass 1).
//!
//! The tabular header has to be written before the first row, and the full column set
//! is only known after every record has been seen. Discovery is therefore its own pass
//! over the corpus, ahead of [`crate::tabular`], trading a second read of the data for
//! a complete, stable header.
//!
//! The accumulator holds field names only, so its size is bounded by the number of
//! distinct fields in the corpus, never by the number of records.

use crate::corpus::Corpus;
use crate::io::stream_artifact;
use crate::merge::{MergeOptions, MergeStats, RecordSink, StreamMerger};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs::{File, read_to_string};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Sorted, de-duplicated list of field names. Frozen once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Schema {
    fields: Vec<String>,
}

impl Schema {
    /// Build a schema from any field names; order and duplicates are normalised.
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = fields.into_iter().map(Into::into).collect();
        Self {
            fields: set.into_iter().collect(),
        }
    }

    /// Column names in column order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Column index of `field`.
    #[must_use]
    pub fn position(&self, field: &str) -> Option<usize> {
        self.fields
            .binary_search_by(|known| known.as_str().cmp(field))
            .ok()
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.position(field).is_some()
    }

    /// Persist as a JSON array of field names.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut w, self)
            .with_context(|| format!("serialize schema to {}", path.display()))?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }

    /// Load a schema written by [`Schema::save`].
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a JSON array of strings.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse schema {}", path.display()))
    }
}

impl From<Vec<String>> for Schema {
    fn from(fields: Vec<String>) -> Self {
        Self::from_fields(fields)
    }
}

impl From<Schema> for Vec<String> {
    fn from(schema: Schema) -> Self {
        schema.fields
    }
}

/// Running union of top-level field names.
#[derive(Debug, Clone, Default)]
pub struct SchemaAccumulator {
    fields: BTreeSet<String>,
    records: u64,
}

impl SchemaAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the keys of one record.
    pub fn observe(&mut self, record: &Map<String, Value>) {
        for key in record.keys() {
            if !self.fields.contains(key) {
                self.fields.insert(key.clone());
            }
        }
        self.records += 1;
    }

    /// Records observed so far.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Freeze the union into a [`Schema`].
    #[must_use]
    pub fn finish(self) -> Schema {
        Schema {
            fields: self.fields.into_iter().collect(),
        }
    }
}

impl RecordSink for SchemaAccumulator {
    fn accept(&mut self, record: &Map<String, Value>, _line: Option<&str>) -> io::Result<()> {
        self.observe(record);
        Ok(())
    }
}

/// Result of a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub schema: Schema,
    pub records: u64,
}

/// Discover the schema of a merged artifact (NDJSON or wrapped array).
///
/// # Errors
/// Returns an error if the artifact cannot be read in full.
pub fn discover_artifact(path: impl AsRef<Path>) -> Result<Discovery> {
    let path = path.as_ref();
    let mut acc = SchemaAccumulator::new();
    stream_artifact(path, |record, line| acc.accept(record, line))
        .with_context(|| format!("discover schema of {}", path.display()))?;
    let records = acc.records();
    let schema = acc.finish();
    info!(input = %path.display(), records, fields = schema.len(), "schema discovered");
    Ok(Discovery { schema, records })
}

/// Discover the schema straight from the shards, with the same shard-failure policy
/// as the merge.
///
/// # Errors
/// Never fails on shard problems; see [`StreamMerger::fold`].
pub fn discover_corpus(corpus: &Corpus, options: MergeOptions) -> Result<(Discovery, MergeStats)> {
    let mut merger = StreamMerger::new(SchemaAccumulator::new(), options);
    let stats = merger.fold(corpus)?;
    let acc = merger.into_sink();
    let records = acc.records();
    Ok((
        Discovery {
            schema: acc.finish(),
            records,
        },
        stats,
    ))
}
