//! Command-line interface.
//!
//! ## Commands
//!
//! - `jsonfold merge` - fold shards into one NDJSON artifact
//! - `jsonfold wrap` - reframe an NDJSON artifact as a JSON array
//! - `jsonfold schema` - discover the field union and save it
//! - `jsonfold tabulate` - write the schema-aligned delimited artifact
//! - `jsonfold run` - every pass above, with skip-if-exists
//! - `jsonfold upload` / `jsonfold resume` - chunked transfer into a directory store

#![allow(clippy::print_stdout)]

use crate::config::JobConfig;
use crate::corpus::Corpus;
use crate::merge::{MergeOptions, MergeStats, merge_to_ndjson};
use crate::pipeline::run_job;
use crate::schema::{Discovery, Schema, discover_artifact, discover_corpus};
use crate::sniff::FormatHint;
use crate::tabular::{TabularOptions, TabularStats, tabulate_artifact, tabulate_corpus};
use crate::transfer::{ChunkedTransferAgent, DirectoryChunkStore, RetryPolicy, TransferAgent};
use crate::wrap::wrap_file;
use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Bounded-memory ingestion of sharded JSON corpora.
#[derive(Debug, Parser)]
#[command(name = "jsonfold")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fold shards into one NDJSON artifact.
    Merge(MergeArgs),
    /// Wrap an NDJSON artifact into a JSON array artifact.
    Wrap(WrapArgs),
    /// Discover the sorted union of field names.
    Schema(SchemaArgs),
    /// Write the schema-aligned delimited artifact.
    Tabulate(TabulateArgs),
    /// Run merge, wrap, schema and tabulate as one job.
    Run(RunArgs),
    /// Upload an artifact into a directory-backed chunk store.
    Upload(UploadArgs),
    /// Resume an interrupted upload.
    Resume(ResumeArgs),
}

/// Where the shards come from. Exactly one source may be given.
#[derive(Debug, Clone, Default, Args)]
pub struct CorpusArgs {
    /// Shard files, merged in the order given.
    pub shards: Vec<PathBuf>,
    /// Directory of shards, merged in file-name order.
    #[arg(long)]
    pub input_dir: Option<PathBuf>,
    /// File listing shard paths, one per line.
    #[arg(long)]
    pub manifest: Option<PathBuf>,
    /// Glob pattern for shards, merged in path order.
    #[arg(long)]
    pub glob: Option<String>,
    /// Suffix matched in `--input-dir` (repeatable).
    #[arg(long = "suffix")]
    pub suffixes: Vec<String>,
    /// Shard format: auto, array or lines.
    #[arg(long)]
    pub format: Option<FormatHint>,
}

impl CorpusArgs {
    fn is_set(&self) -> bool {
        !self.shards.is_empty()
            || self.input_dir.is_some()
            || self.manifest.is_some()
            || self.glob.is_some()
    }

    /// Overlay these flags on `config`; a source given here replaces the file's source.
    fn apply(&self, config: &mut JobConfig) {
        if self.is_set() {
            config.shards.clone_from(&self.shards);
            config.input_dir.clone_from(&self.input_dir);
            config.manifest.clone_from(&self.manifest);
            config.glob.clone_from(&self.glob);
        }
        if !self.suffixes.is_empty() {
            config.suffixes.clone_from(&self.suffixes);
        }
        if let Some(format) = self.format {
            config.format = format;
        }
    }

    fn resolve(&self) -> Result<(Corpus, MergeOptions)> {
        let mut config = JobConfig::default();
        self.apply(&mut config);
        Ok((config.corpus()?, config.merge_options()))
    }
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,
    /// NDJSON artifact to write (a codec extension compresses it).
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct WrapArgs {
    /// NDJSON artifact.
    pub input: PathBuf,
    /// JSON array artifact to write.
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Merged artifact to scan; without it the shards are scanned directly.
    #[arg(long, conflicts_with_all = ["shards", "input_dir", "manifest", "glob"])]
    pub input: Option<PathBuf>,
    #[command(flatten)]
    pub corpus: CorpusArgs,
    /// Schema file to write.
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct TabulateArgs {
    /// Merged artifact to read; without it the shards are read directly.
    #[arg(long, conflicts_with_all = ["shards", "input_dir", "manifest", "glob"])]
    pub input: Option<PathBuf>,
    #[command(flatten)]
    pub corpus: CorpusArgs,
    /// Saved schema; discovered with an extra pass when omitted.
    #[arg(long)]
    pub schema: Option<PathBuf>,
    /// Field delimiter.
    #[arg(long, default_value_t = ',')]
    pub delimiter: char,
    /// Delimited artifact to write.
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// JSON job configuration; flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub corpus: CorpusArgs,
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    #[arg(long)]
    pub delimiter: Option<char>,
    /// Rebuild artifacts that already exist.
    #[arg(long)]
    pub overwrite: bool,
}

impl RunArgs {
    fn job_config(&self) -> Result<JobConfig> {
        let mut config = match &self.config {
            Some(path) => JobConfig::load(path)?,
            None => JobConfig::default(),
        };
        self.corpus.apply(&mut config);
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(delimiter) = self.delimiter {
            config.delimiter = delimiter;
        }
        config.overwrite |= self.overwrite;
        Ok(config)
    }
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Local artifact.
    pub local: PathBuf,
    /// Store root directory.
    #[arg(long)]
    pub store: PathBuf,
    /// Destination key inside the store.
    #[arg(long)]
    pub remote: String,
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    pub chunk_size: u64,
    #[arg(long, default_value_t = 5)]
    pub max_retries: u32,
}

#[derive(Debug, Args)]
pub struct ResumeArgs {
    pub session_id: String,
    /// Store root directory.
    #[arg(long)]
    pub store: PathBuf,
}

fn print_merge(stats: &MergeStats) {
    println!(
        "merged {} records from {} shards ({} skipped, {} abandoned)",
        stats.records,
        stats.completed_shards(),
        stats.skipped_shards(),
        stats.abandoned_shards()
    );
}

fn print_tabular(stats: TabularStats) {
    println!(
        "wrote {} rows x {} columns ({} fields dropped)",
        stats.rows, stats.columns, stats.dropped_fields
    );
}

impl Cli {
    /// Run the selected command.
    ///
    /// # Errors
    /// Returns an error if the command fails; the binary exits non-zero.
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Merge(args) => {
                let (corpus, options) = args.corpus.resolve()?;
                print_merge(&merge_to_ndjson(&corpus, &args.output, options)?);
            }
            Commands::Wrap(args) => {
                let elements = wrap_file(&args.input, &args.output)?;
                println!("wrapped {elements} elements");
            }
            Commands::Schema(args) => {
                let Discovery { schema, records } = match &args.input {
                    Some(input) => discover_artifact(input)?,
                    None => {
                        let (corpus, options) = args.corpus.resolve()?;
                        let (discovery, stats) = discover_corpus(&corpus, options)?;
                        print_merge(&stats);
                        discovery
                    }
                };
                schema.save(&args.output)?;
                println!("{} fields from {records} records", schema.len());
            }
            Commands::Tabulate(args) => {
                let options = TabularOptions::with_delimiter(args.delimiter)?;
                match &args.input {
                    Some(input) => {
                        let schema = match &args.schema {
                            Some(path) => Schema::load(path)?,
                            None => discover_artifact(input)?.schema,
                        };
                        print_tabular(tabulate_artifact(input, &schema, &args.output, options)?);
                    }
                    None => {
                        let (corpus, merge) = args.corpus.resolve()?;
                        let schema = match &args.schema {
                            Some(path) => Schema::load(path)?,
                            None => discover_corpus(&corpus, merge)?.0.schema,
                        };
                        let (stats, merge_stats) = tabulate_corpus(&corpus, &schema, &args.output, merge, options)?;
                        print_merge(&merge_stats);
                        print_tabular(stats);
                    }
                }
            }
            Commands::Run(args) => {
                let report = run_job(&args.job_config()?)?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Commands::Upload(args) => {
                if args.chunk_size == 0 {
                    bail!("--chunk-size must be positive");
                }
                let policy = RetryPolicy {
                    max_retries: args.max_retries,
                    ..RetryPolicy::default()
                };
                let mut agent = ChunkedTransferAgent::new(DirectoryChunkStore::new(&args.store)?);
                let receipt = agent.upload(&args.local, &args.remote, args.chunk_size, policy)?;
                println!("{}", serde_json::to_string_pretty(&receipt)?);
            }
            Commands::Resume(args) => {
                let mut agent = ChunkedTransferAgent::new(DirectoryChunkStore::new(&args.store)?);
                let receipt = agent.resume(&args.session_id)?;
                println!("{}", serde_json::to_string_pretty(&receipt)?);
            }
        }
        Ok(())
    }
}
