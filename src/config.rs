//! Job configuration.
//!
//! A [`JobConfig`] names the corpus, where the artifacts go and how they are formatted.
//! It can be loaded from a JSON file; every field has a default, and command-line flags
//! override whatever the file sets.
//!
//! ```json
//! {
//!   "input_dir": "dumps/2019",
//!   "output_dir": "out",
//!   "delimiter": "\t",
//!   "overwrite": false
//! }
//! ```

use crate::corpus::{Corpus, DEFAULT_SUFFIXES};
use crate::merge::MergeOptions;
use crate::sniff::FormatHint;
use crate::tabular::TabularOptions;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Directory whose matching files form the corpus (sorted by name).
    pub input_dir: Option<PathBuf>,
    /// Manifest file listing shards in order.
    pub manifest: Option<PathBuf>,
    /// Explicit shard list, in order.
    pub shards: Vec<PathBuf>,
    /// Glob pattern; matches are sorted by path.
    pub glob: Option<String>,
    /// File suffixes matched in `input_dir`.
    pub suffixes: Vec<String>,
    pub output_dir: PathBuf,
    pub ndjson_name: String,
    pub array_name: String,
    pub schema_name: String,
    pub tabular_name: String,
    pub report_name: String,
    pub format: FormatHint,
    pub delimiter: char,
    /// Rebuild artifacts that already exist instead of keeping them.
    pub overwrite: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            input_dir: None,
            manifest: None,
            shards: Vec::new(),
            glob: None,
            suffixes: DEFAULT_SUFFIXES.iter().map(ToString::to_string).collect(),
            output_dir: PathBuf::from("out"),
            ndjson_name: "merged.ndjson".to_string(),
            array_name: "merged.json".to_string(),
            schema_name: "schema.json".to_string(),
            tabular_name: "merged.csv".to_string(),
            report_name: "report.json".to_string(),
            format: FormatHint::Auto,
            delimiter: ',',
            overwrite: false,
        }
    }
}

impl JobConfig {
    /// Load a configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or holds unknown or mistyped keys.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Build the corpus from whichever single source is configured.
    ///
    /// # Errors
    /// Returns an error if no source or more than one source is set, if the source
    /// cannot be read, or if it yields no shards.
    pub fn corpus(&self) -> Result<Corpus> {
        let sources = [
            !self.shards.is_empty(),
            self.manifest.is_some(),
            self.input_dir.is_some(),
            self.glob.is_some(),
        ];
        if sources.iter().filter(|set| **set).count() != 1 {
            bail!("exactly one of shards, manifest, input_dir or glob must be set");
        }
        let (corpus, origin) = if let Some(manifest) = &self.manifest {
            (Corpus::from_manifest(manifest)?, manifest.display().to_string())
        } else if let Some(dir) = &self.input_dir {
            (Corpus::from_dir(dir, &self.suffixes)?, dir.display().to_string())
        } else if let Some(pattern) = &self.glob {
            (Corpus::from_glob(pattern)?, pattern.clone())
        } else {
            (Corpus::new(self.shards.iter().cloned()), "shard list".to_string())
        };
        corpus.require_non_empty(&origin)
    }

    #[must_use]
    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions { format: self.format }
    }

    /// # Errors
    /// Returns an error if the delimiter is not usable.
    pub fn tabular_options(&self) -> Result<TabularOptions> {
        TabularOptions::with_delimiter(self.delimiter)
    }

    #[must_use]
    pub fn ndjson_path(&self) -> PathBuf {
        self.output_dir.join(&self.ndjson_name)
    }

    #[must_use]
    pub fn array_path(&self) -> PathBuf {
        self.output_dir.join(&self.array_name)
    }

    #[must_use]
    pub fn schema_path(&self) -> PathBuf {
        self.output_dir.join(&self.schema_name)
    }

    #[must_use]
    pub fn tabular_path(&self) -> PathBuf {
        self.output_dir.join(&self.tabular_name)
    }

    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(&self.report_name)
    }
}
