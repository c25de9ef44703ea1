//! Incremental multi-shard merge.
//!
//! The corpus is folded left to right, one shard at a time:
//!
//! ```text
//! result_0 = empty
//! result_i = merge(result_{i-1}, shard_i)
//! ```
//!
//! Each step opens one shard, streams its records into a [`RecordSink`], flushes the
//! sink and closes the shard before the next one is touched. Opening every shard at once
//! exhausts file handles and decoder memory at corpus scale, so it is never done. The
//! fold only needs to be applied in order; it is not associative and is never regrouped.
//!
//! Counters live in [`MergeStats`], which is threaded through the fold and returned,
//! so a single step is an ordinary function that can be tested on its own.
//!
//! Shard-level failures (unknown format, unreadable or malformed content) are logged and
//! recorded in the shard's [`ShardOutcome`]; records already emitted from an abandoned
//! shard stay emitted. Sink failures abort the fold.

use crate::corpus::Corpus;
use crate::error::{ShardError, StreamError};
use crate::io::artifact::ArtifactWriter;
use crate::io::{open_source, stream_records};
use crate::sniff::{FormatHint, ShardFormat, sniff_path};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Destination for merged records.
///
/// Implemented by the NDJSON writer, the schema accumulator and the tabular writer, so
/// any of them can consume the corpus directly.
pub trait RecordSink {
    /// Accept one record. `line` is the verbatim source line for line-delimited shards.
    ///
    /// # Errors
    /// Any error is treated as an output failure and aborts the fold.
    fn accept(&mut self, record: &Map<String, Value>, line: Option<&str>) -> io::Result<()>;

    /// Called after every shard, successful or not.
    ///
    /// # Errors
    /// Any error is treated as an output failure and aborts the fold.
    fn end_shard(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn accept(&mut self, record: &Map<String, Value>, line: Option<&str>) -> io::Result<()> {
        (**self).accept(record, line)
    }

    fn end_shard(&mut self) -> io::Result<()> {
        (**self).end_shard()
    }
}

/// Writes records as NDJSON: source lines verbatim, array elements compact.
pub struct NdjsonSink<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for NdjsonSink<W> {
    fn accept(&mut self, record: &Map<String, Value>, line: Option<&str>) -> io::Result<()> {
        match line {
            Some(line) => self.writer.write_all(line.as_bytes())?,
            None => serde_json::to_writer(&mut self.writer, record)?,
        }
        self.writer.write_all(b"\n")
    }

    fn end_shard(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// What happened to one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ShardStatus {
    /// Every record was merged.
    Merged,
    /// Readable, but held no records.
    Empty,
    /// Not merged at all (unrecognised format or unopenable).
    Skipped(String),
    /// Failed part-way; `records` were merged before the failure.
    Abandoned(String),
}

/// Per-shard entry of the merge report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardOutcome {
    pub path: PathBuf,
    pub format: ShardFormat,
    pub records: u64,
    pub status: ShardStatus,
}

/// Accumulator threaded through the fold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Records merged across all shards so far.
    pub records: u64,
    /// One entry per shard, in corpus order.
    pub shards: Vec<ShardOutcome>,
}

impl MergeStats {
    /// Shards whose records were all merged (including empty ones).
    #[must_use]
    pub fn completed_shards(&self) -> usize {
        self.count(|s| matches!(s, ShardStatus::Merged | ShardStatus::Empty))
    }

    #[must_use]
    pub fn skipped_shards(&self) -> usize {
        self.count(|s| matches!(s, ShardStatus::Skipped(_)))
    }

    #[must_use]
    pub fn abandoned_shards(&self) -> usize {
        self.count(|s| matches!(s, ShardStatus::Abandoned(_)))
    }

    fn count(&self, pred: impl Fn(&ShardStatus) -> bool) -> usize {
        self.shards.iter().filter(|o| pred(&o.status)).count()
    }

    fn with(mut self, outcome: ShardOutcome) -> Self {
        self.records += outcome.records;
        self.shards.push(outcome);
        self
    }
}

/// Options for a merge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Sniff each shard, or force one format for all of them.
    pub format: FormatHint,
}

/// Folds shards into a [`RecordSink`].
pub struct StreamMerger<S: RecordSink> {
    sink: S,
    options: MergeOptions,
}

impl<S: RecordSink> StreamMerger<S> {
    pub fn new(sink: S, options: MergeOptions) -> Self {
        Self { sink, options }
    }

    /// Fold every shard of `corpus`, in corpus order, starting from an empty accumulator.
    ///
    /// # Errors
    /// Only output failures are returned; shard failures are recorded in the stats.
    pub fn fold(&mut self, corpus: &Corpus) -> Result<MergeStats> {
        corpus
            .iter()
            .try_fold(MergeStats::default(), |acc, shard| self.merge(acc, shard))
    }

    /// One fold step: merge `shard` onto the result so far.
    ///
    /// # Errors
    /// Returns an error only when the sink fails; the run must stop.
    pub fn merge(&mut self, acc: MergeStats, shard: &Path) -> Result<MergeStats> {
        let started = Instant::now();
        let (format, result) = self.merge_shard(shard);
        self.sink
            .end_shard()
            .with_context(|| format!("flush output after shard {}", shard.display()))?;

        let outcome = match result {
            Ok(records) => {
                let bytes = std::fs::metadata(shard).map_or(0, |m| m.len());
                let secs = started.elapsed().as_secs_f64();
                #[allow(clippy::cast_precision_loss)]
                let mbps = if secs > 0.0 {
                    bytes as f64 / (1024.0 * 1024.0) / secs
                } else {
                    0.0
                };
                info!(
                    shard = %shard.display(),
                    %format,
                    records,
                    total = acc.records + records,
                    elapsed = %format!("{secs:.1}s"),
                    throughput = %format!("~{mbps:.1} MB/s"),
                    "merged shard"
                );
                ShardOutcome {
                    path: shard.to_path_buf(),
                    format,
                    records,
                    status: if records == 0 {
                        ShardStatus::Empty
                    } else {
                        ShardStatus::Merged
                    },
                }
            }
            Err(ShardError::Read {
                source: StreamError::Sink(err),
                ..
            }) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("write records from shard {}", shard.display())));
            }
            Err(err) => {
                let (records, status) = match &err {
                    ShardError::Read { source, .. } => {
                        (source.records_before(), ShardStatus::Abandoned(err.to_string()))
                    }
                    ShardError::Classification { .. } | ShardError::Open { .. } => {
                        (0, ShardStatus::Skipped(err.to_string()))
                    }
                };
                warn!(shard = %shard.display(), records_kept = records, "{err}");
                ShardOutcome {
                    path: shard.to_path_buf(),
                    format,
                    records,
                    status,
                }
            }
        };
        Ok(acc.with(outcome))
    }

    fn merge_shard(&mut self, shard: &Path) -> (ShardFormat, Result<u64, ShardError>) {
        let (format, first) = match self.options.format.forced() {
            Some(format) => (format, None),
            None => match sniff_path(shard) {
                Ok(found) => found,
                Err(err) => {
                    return (
                        ShardFormat::Unknown,
                        Err(ShardError::Open {
                            path: shard.to_path_buf(),
                            reason: format!("{err:#}"),
                        }),
                    );
                }
            },
        };
        if format == ShardFormat::Unknown {
            return (
                format,
                Err(ShardError::Classification {
                    path: shard.to_path_buf(),
                    found: first.map(char::from),
                }),
            );
        }
        let reader = match open_source(shard) {
            Ok(reader) => reader,
            Err(err) => {
                return (
                    format,
                    Err(ShardError::Open {
                        path: shard.to_path_buf(),
                        reason: format!("{err:#}"),
                    }),
                );
            }
        };
        debug!(shard = %shard.display(), %format, "streaming shard");
        let sink = &mut self.sink;
        let result = stream_records(reader, format, |record, line| sink.accept(record, line))
            .map_err(|source| ShardError::Read {
                path: shard.to_path_buf(),
                source,
            });
        (format, result)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Merge `corpus` into an NDJSON artifact at `output`.
///
/// The artifact only appears at `output` once every shard has been folded in.
///
/// # Errors
/// Returns an error if the artifact cannot be created, written or committed.
pub fn merge_to_ndjson(corpus: &Corpus, output: impl AsRef<Path>, options: MergeOptions) -> Result<MergeStats> {
    let output = output.as_ref();
    let artifact = ArtifactWriter::create(output)?;
    let mut merger = StreamMerger::new(NdjsonSink::new(artifact), options);
    let stats = merger.fold(corpus)?;
    merger.into_sink().into_inner().commit()?;
    info!(
        output = %output.display(),
        records = stats.records,
        shards = corpus.len(),
        completed = stats.completed_shards(),
        skipped = stats.skipped_shards(),
        abandoned = stats.abandoned_shards(),
        "merge complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn single_step_from_empty_accumulator() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let shard = dir.path().join("a.json");
        fs::write(&shard, r#"[{"a":1},{"a":2}]"#)?;

        let mut merger = StreamMerger::new(NdjsonSink::new(Vec::new()), MergeOptions::default());
        let stats = merger.merge(MergeStats::default(), &shard)?;
        assert_eq!(stats.records, 2);
        assert_eq!(stats.shards[0].status, ShardStatus::Merged);
        assert_eq!(stats.shards[0].format, ShardFormat::Array);
        let out = String::from_utf8(merger.into_sink().into_inner())?;
        assert_eq!(out, "{\"a\":1}\n{\"a\":2}\n");
        Ok(())
    }

    #[test]
    fn forced_format_bypasses_sniffing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let shard = dir.path().join("odd.txt");
        fs::write(&shard, "{\"x\":1}\n")?;
        let options = MergeOptions {
            format: FormatHint::Array,
        };
        let mut merger = StreamMerger::new(NdjsonSink::new(Vec::new()), options);
        let stats = merger.merge(MergeStats::default(), &shard)?;
        assert_eq!(stats.records, 0);
        assert!(matches!(stats.shards[0].status, ShardStatus::Abandoned(_)));
        Ok(())
    }

    #[test]
    fn missing_shard_is_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut merger = StreamMerger::new(NdjsonSink::new(Vec::new()), MergeOptions::default());
        let stats = merger.merge(MergeStats::default(), &dir.path().join("gone.json"))?;
        assert_eq!(stats.skipped_shards(), 1);
        assert_eq!(stats.records, 0);
        Ok(())
    }

    struct FailingSink;

    impl RecordSink for FailingSink {
        fn accept(&mut self, _: &Map<String, Value>, _: Option<&str>) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"))
        }
    }

    #[test]
    fn sink_failure_aborts_the_fold() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let shard = dir.path().join("a.jsonl");
        fs::write(&shard, "{\"a\":1}\n")?;
        let mut merger = StreamMerger::new(FailingSink, MergeOptions::default());
        let err = merger
            .fold(&Corpus::new([&shard, &shard]))
            .expect_err("sink failure must propagate");
        assert!(format!("{err:#}").contains("disk full"));
        Ok(())
    }
}
