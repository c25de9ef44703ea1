//! # jsonfold
//!
//! Bounded-memory ingestion of large, sharded JSON corpora.
//!
//! A corpus is an ordered list of shard files. Each shard is either one top-level JSON
//! array of objects or newline-delimited JSON objects, optionally compressed. jsonfold
//! folds the shards, one at a time and one record at a time, into:
//!
//! - a merged NDJSON stream
//! - a single valid JSON array
//! - a delimited tabular file whose columns are the sorted union of every field name
//!
//! Memory use is bounded by one record plus the set of distinct field names, never by
//! the size of a shard or of the corpus.
//!
//! ## Quick Start
//!
//! ```no_run
//! use jsonfold::corpus::{Corpus, DEFAULT_SUFFIXES};
//! use jsonfold::merge::{MergeOptions, merge_to_ndjson};
//! use jsonfold::schema::discover_artifact;
//! use jsonfold::tabular::{TabularOptions, tabulate_artifact};
//! use jsonfold::wrap::wrap_file;
//!
//! # fn main() -> anyhow::Result<()> {
//! let corpus = Corpus::from_dir("dumps", DEFAULT_SUFFIXES)?.require_non_empty("dumps")?;
//! let stats = merge_to_ndjson(&corpus, "out/merged.ndjson", MergeOptions::default())?;
//! println!("{} records, {} shards abandoned", stats.records, stats.abandoned_shards());
//!
//! wrap_file("out/merged.ndjson", "out/merged.json")?;
//!
//! let discovery = discover_artifact("out/merged.ndjson")?;
//! tabulate_artifact("out/merged.ndjson", &discovery.schema, "out/merged.csv", TabularOptions::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! [`pipeline::run_job`] runs the same passes from a [`config::JobConfig`].
//!
//! ## Failure policy
//!
//! Shard problems never stop a run. A shard whose format cannot be recognised is
//! skipped; a shard that fails part-way is abandoned, keeping the records merged before
//! the failure. Both are logged and recorded in [`merge::MergeStats`]. Failing to write
//! an artifact stops the run immediately. Artifacts are written beside their final path
//! and renamed into place only when a pass finishes, so a crash never leaves a
//! truncated artifact under the final name.
//!
//! ## Module Overview
//!
//! - [`sniff`] - shard format classification
//! - [`corpus`] - ordered shard lists
//! - [`merge`] - the shard fold and its sinks
//! - [`wrap`] - NDJSON to JSON array reframing
//! - [`schema`] - field-union discovery
//! - [`tabular`] - schema-aligned delimited output
//! - [`transfer`] - resumable chunked delivery of artifacts
//! - [`io`] - record streaming, compression and artifact files
//! - [`config`], [`pipeline`], [`cli`] - jobs and the `jsonfold` binary

pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod io;
pub mod merge;
pub mod pipeline;
pub mod schema;
pub mod sniff;
pub mod tabular;
pub mod transfer;
pub mod wrap;

pub use config::JobConfig;
pub use corpus::Corpus;
pub use error::{ShardError, StreamError};
pub use merge::{MergeOptions, MergeStats, RecordSink, ShardOutcome, ShardStatus, StreamMerger};
pub use pipeline::{JobReport, run_job};
pub use schema::{Schema, SchemaAccumulator};
pub use sniff::{FormatHint, ShardFormat};
pub use tabular::{TabularOptions, TabularStats, TabularWriter};
