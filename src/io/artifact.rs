//! Write-then-rename artifact files.
//!
//! An artifact is only valid once the pass that produced it completes. Bytes go to a
//! sibling `<name>.partial` file; [`ArtifactWriter::commit`] flushes, syncs and renames it
//! over the final path. A pass that fails or is interrupted leaves the previously
//! committed artifact (if any) untouched.

use crate::io::compression::{FinishWrite, auto_detect_writer};
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::{File, create_dir_all, remove_file, rename};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix appended to an artifact path while its pass is in flight.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Exclusive writer for one artifact for the duration of one pass.
pub struct ArtifactWriter {
    final_path: PathBuf,
    partial_path: PathBuf,
    inner: Option<Box<dyn FinishWrite>>,
}

/// Path of the in-flight file for `path`.
#[must_use]
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

impl ArtifactWriter {
    /// Start a new pass writing to `path`.
    ///
    /// Parent directories are created as needed. Compression is chosen from the final
    /// path's extension, so `tabular.csv.zst` is written zstd-compressed.
    ///
    /// # Errors
    /// Returns an error if the directory or the partial file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        if let Some(parent) = final_path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
        }
        let partial_path = partial_path(&final_path);
        let file = File::create(&partial_path)
            .with_context(|| format!("create {}", partial_path.display()))?;
        let inner = auto_detect_writer(file, &final_path)
            .with_context(|| format!("setup compression for {}", final_path.display()))?;
        Ok(Self {
            final_path,
            partial_path,
            inner: Some(inner),
        })
    }

    /// Final location of the artifact.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.final_path
    }

    /// Close the pass: finish compression, flush, sync to disk and rename into place.
    ///
    /// # Errors
    /// Returns an error if any of the close, sync or rename steps fail; the previously
    /// committed artifact is left as it was. A failed close also removes the partial file.
    pub fn commit(mut self) -> Result<PathBuf> {
        let inner = self
            .inner
            .take()
            .ok_or_else(|| io::Error::other("artifact writer already closed"))?;
        if let Err(err) = inner.close() {
            let _ = remove_file(&self.partial_path);
            return Err(anyhow::Error::new(err)
                .context(format!("close {}", self.partial_path.display())));
        }
        File::open(&self.partial_path)
            .and_then(|f| f.sync_all())
            .with_context(|| format!("sync {}", self.partial_path.display()))?;
        rename(&self.partial_path, &self.final_path).with_context(|| {
            format!(
                "rename {} -> {}",
                self.partial_path.display(),
                self.final_path.display()
            )
        })?;
        debug!(path = %self.final_path.display(), "artifact committed");
        Ok(self.final_path.clone())
    }

    fn inner(&mut self) -> io::Result<&mut Box<dyn FinishWrite>> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::other("artifact writer already closed"))
    }
}

impl Write for ArtifactWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner()?.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner()?.flush()
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        // Uncommitted: the pass never completed, discard what it wrote.
        if self.inner.take().is_some() {
            let _ = remove_file(&self.partial_path);
        }
    }
}
