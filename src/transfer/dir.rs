//! [`ChunkStore`] rooted at a local directory.
//!
//! Layout under the root:
//!
//! ```text
//! .sessions/<id>/session.json
//! .sessions/<id>/chunk-00000000
//! .sessions/<id>/complete
//! <remote key>
//! ```
//!
//! Chunks and published objects are written beside their final name and renamed into
//! place, so a reader never sees a torn file.

use super::traits::{
    ChunkStore, ErrorKind, SessionInfo, TransferError, TransferResult, validate_remote_key,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const SESSIONS_DIR: &str = ".sessions";
const SESSION_FILE: &str = "session.json";
const COMPLETE_MARKER: &str = "complete";
const CHUNK_PREFIX: &str = "chunk-";

#[derive(Debug, Clone)]
pub struct DirectoryChunkStore {
    root: PathBuf,
}

fn store_io(path: &Path, err: &io::Error) -> TransferError {
    TransferError::new(ErrorKind::Other, format!("{}: {err}", path.display()))
}

impl DirectoryChunkStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> TransferResult<Self> {
        let root = root.into();
        let sessions = root.join(SESSIONS_DIR);
        fs::create_dir_all(&sessions).map_err(|e| store_io(&sessions, &e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the object for `remote` is published.
    #[must_use]
    pub fn object_path(&self, remote: &str) -> PathBuf {
        self.root.join(remote)
    }

    fn session_dir(&self, session_id: &str) -> TransferResult<PathBuf> {
        if session_id.is_empty() || !session_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TransferError::new(
                ErrorKind::InvalidInput,
                format!("malformed session id {session_id:?}"),
            ));
        }
        Ok(self.root.join(SESSIONS_DIR).join(session_id))
    }

    fn existing_session_dir(&self, session_id: &str) -> TransferResult<PathBuf> {
        let dir = self.session_dir(session_id)?;
        if dir.join(SESSION_FILE).is_file() {
            Ok(dir)
        } else {
            Err(TransferError::new(ErrorKind::SessionNotFound, format!("no session {session_id}")))
        }
    }
}

fn chunk_name(index: u64) -> String {
    format!("{CHUNK_PREFIX}{index:08}")
}

/// Write `data` next to `path` and rename it into place.
fn write_replace(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

impl ChunkStore for DirectoryChunkStore {
    fn session(&self, session_id: &str) -> TransferResult<Option<SessionInfo>> {
        let path = self.session_dir(session_id)?.join(SESSION_FILE);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| TransferError::new(ErrorKind::Other, format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_io(&path, &e)),
        }
    }

    fn begin(&mut self, info: &SessionInfo) -> TransferResult<()> {
        validate_remote_key(&info.remote)?;
        let dir = self.session_dir(&info.session_id)?;
        let path = dir.join(SESSION_FILE);
        if path.is_file() {
            return Ok(());
        }
        fs::create_dir_all(&dir).map_err(|e| store_io(&dir, &e))?;
        let json = serde_json::to_vec_pretty(info)
            .map_err(|e| TransferError::new(ErrorKind::Other, e.to_string()))?;
        write_replace(&path, &json).map_err(|e| store_io(&path, &e))
    }

    fn acknowledged(&self, session_id: &str) -> TransferResult<BTreeSet<u64>> {
        let dir = self.existing_session_dir(session_id)?;
        let entries = fs::read_dir(&dir).map_err(|e| store_io(&dir, &e))?;
        let mut acked = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| store_io(&dir, &e))?;
            let name = entry.file_name();
            let index = name
                .to_str()
                .and_then(|n| n.strip_prefix(CHUNK_PREFIX))
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(index) = index {
                acked.insert(index);
            }
        }
        Ok(acked)
    }

    fn put_chunk(&mut self, session_id: &str, index: u64, data: &[u8]) -> TransferResult<()> {
        let path = self.existing_session_dir(session_id)?.join(chunk_name(index));
        write_replace(&path, data).map_err(|e| store_io(&path, &e))
    }

    fn complete(&mut self, session_id: &str) -> TransferResult<()> {
        let dir = self.existing_session_dir(session_id)?;
        if dir.join(COMPLETE_MARKER).is_file() {
            return Ok(());
        }
        let info = self.session(session_id)?.ok_or_else(|| {
            TransferError::new(ErrorKind::SessionNotFound, format!("no session {session_id}"))
        })?;
        let target = self.object_path(&info.remote);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| store_io(parent, &e))?;
        }
        let mut partial = target.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let file = File::create(&partial).map_err(|e| store_io(&partial, &e))?;
        let mut out = BufWriter::new(file);
        let mut hasher = Sha256::new();
        for index in 0..info.total_chunks {
            let chunk_path = dir.join(chunk_name(index));
            let chunk = fs::read(&chunk_path).map_err(|e| {
                let _ = fs::remove_file(&partial);
                if e.kind() == io::ErrorKind::NotFound {
                    TransferError::new(ErrorKind::InvalidInput, format!("chunk {index} missing"))
                } else {
                    store_io(&chunk_path, &e)
                }
            })?;
            hasher.update(&chunk);
            out.write_all(&chunk).map_err(|e| store_io(&partial, &e))?;
        }
        let file = out.into_inner().map_err(|e| store_io(&partial, e.error()))?;
        file.sync_all().map_err(|e| store_io(&partial, &e))?;
        drop(file);

        if format!("{:x}", hasher.finalize()) != info.digest {
            let _ = fs::remove_file(&partial);
            return Err(TransferError::new(
                ErrorKind::DigestMismatch,
                format!("assembled object for {} does not match digest", info.remote),
            ));
        }
        fs::rename(&partial, &target).map_err(|e| store_io(&target, &e))?;
        let marker = dir.join(COMPLETE_MARKER);
        write_replace(&marker, info.digest.as_bytes()).map_err(|e| store_io(&marker, &e))?;
        for index in 0..info.total_chunks {
            let _ = fs::remove_file(dir.join(chunk_name(index)));
        }
        debug!(session = session_id, object = %target.display(), "object published");
        Ok(())
    }

    fn is_complete(&self, session_id: &str) -> TransferResult<bool> {
        Ok(self.session_dir(session_id)?.join(COMPLETE_MARKER).is_file())
    }

    fn discard(&mut self, session_id: &str) -> TransferResult<()> {
        let dir = self.session_dir(session_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_io(&dir, &e)),
        }
    }
}
