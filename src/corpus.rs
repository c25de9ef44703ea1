//! Explicitly ordered shard lists.
//!
//! Output record order is corpus order, so the corpus order must be reproducible.
//! Directory enumeration order is not: it varies by filesystem and platform. Every
//! constructor here therefore produces an order the caller can state up front:
//!
//! - [`Corpus::new`] - the caller's list, as given
//! - [`Corpus::from_manifest`] - one path per line in a manifest file, as written
//! - [`Corpus::from_dir`] / [`Corpus::from_glob`] - matches sorted by path
//!
//! # Examples
//!
//! ```no_run
//! use jsonfold::corpus::{Corpus, DEFAULT_SUFFIXES};
//!
//! let corpus = Corpus::from_dir("dumps/2019", DEFAULT_SUFFIXES)?;
//! for shard in corpus.iter() {
//!     println!("{}", shard.display());
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::io::compression::logical_name;
use anyhow::{Context, Result, bail};
use glob::glob;
use std::fs::{read_dir, read_to_string};
use std::path::{Path, PathBuf};

/// Shard suffixes recognised by default (matched after stripping a codec extension).
pub const DEFAULT_SUFFIXES: &[&str] = &[".json", ".jsonl", ".ndjson"];

/// An ordered sequence of shard paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    shards: Vec<PathBuf>,
}

impl Corpus {
    /// Corpus in exactly the order given.
    pub fn new<I, P>(shards: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            shards: shards.into_iter().map(Into::into).collect(),
        }
    }

    /// Every regular file directly inside `dir` whose name ends in one of `suffixes`
    /// (case-insensitive, after removing a compression extension), sorted by path.
    ///
    /// Subdirectories are not descended into.
    ///
    /// # Errors
    /// Returns an error if `dir` cannot be listed.
    pub fn from_dir<S: AsRef<str>>(dir: impl AsRef<Path>, suffixes: &[S]) -> Result<Self> {
        let dir = dir.as_ref();
        let suffixes: Vec<String> = suffixes
            .iter()
            .map(|s| s.as_ref().to_lowercase())
            .collect();
        let mut shards = Vec::new();
        for entry in read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
            let entry = entry.with_context(|| format!("list {}", dir.display()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = logical_name(&path).to_lowercase();
            if suffixes.iter().any(|s| name.ends_with(s.as_str())) {
                shards.push(path);
            }
        }
        shards.sort();
        Ok(Self { shards })
    }

    /// Files matching a glob pattern, sorted by path.
    ///
    /// # Errors
    /// Returns an error if the pattern is invalid or a match cannot be read.
    pub fn from_glob(pattern: &str) -> Result<Self> {
        let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;
        let mut shards = Vec::new();
        for entry in paths {
            let path =
                entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
            if path.is_file() {
                shards.push(path);
            }
        }
        shards.sort();
        Ok(Self { shards })
    }

    /// Shards listed in a manifest file, one path per line, in file order.
    ///
    /// Blank lines and lines starting with `#` are ignored. Relative paths are resolved
    /// against the manifest's directory.
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be read.
    pub fn from_manifest(manifest: impl AsRef<Path>) -> Result<Self> {
        let manifest = manifest.as_ref();
        let text = read_to_string(manifest)
            .with_context(|| format!("read manifest {}", manifest.display()))?;
        let base = manifest.parent().unwrap_or_else(|| Path::new(""));
        let shards = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| {
                let p = Path::new(l);
                if p.is_absolute() { p.to_path_buf() } else { base.join(p) }
            })
            .collect();
        Ok(Self { shards })
    }

    /// Fail if the corpus has no shards.
    ///
    /// # Errors
    /// Returns an error naming `origin` when the corpus is empty.
    pub fn require_non_empty(self, origin: &str) -> Result<Self> {
        if self.shards.is_empty() {
            bail!("no shards found in {origin}");
        }
        Ok(self)
    }

    /// Shards in corpus order.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.shards.iter().map(PathBuf::as_path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn explicit_list_keeps_caller_order() {
        let corpus = Corpus::new(["z.json", "a.json", "m.jsonl"]);
        let order: Vec<_> = corpus.iter().map(Path::to_path_buf).collect();
        assert_eq!(order, [PathBuf::from("z.json"), PathBuf::from("a.json"), PathBuf::from("m.jsonl")]);
    }

    #[test]
    fn glob_matches_are_sorted_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["RC_2019-02.jsonl", "RC_2019-01.jsonl", "RS_2019-01.jsonl"] {
            fs::write(dir.path().join(name), "")?;
        }
        fs::create_dir(dir.path().join("RC_dir.jsonl"))?;

        let pattern = format!("{}/RC_*.jsonl", dir.path().display());
        let corpus = Corpus::from_glob(&pattern)?;
        let names: Vec<_> = corpus
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, ["RC_2019-01.jsonl", "RC_2019-02.jsonl"]);
        assert!(Corpus::from_glob("[").is_err());
        Ok(())
    }

    #[test]
    fn manifest_paths_resolve_against_manifest_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manifest = dir.path().join("shards.txt");
        fs::write(&manifest, "  b.json  \n# skipped\n\n/abs/a.json\n")?;
        let corpus = Corpus::from_manifest(&manifest)?;
        let order: Vec<_> = corpus.iter().map(Path::to_path_buf).collect();
        assert_eq!(order, [dir.path().join("b.json"), PathBuf::from("/abs/a.json")]);
        Ok(())
    }
}
