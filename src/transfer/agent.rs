//! Reference [`TransferAgent`] over a [`ChunkStore`].

use super::traits::{
    ChunkStore, ErrorKind, RetryPolicy, SessionInfo, TransferAgent, TransferError, TransferReceipt,
    TransferResult, validate_remote_key,
};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Sessions older than this are not resumed.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Splits an artifact into fixed-size chunks and drives them into a [`ChunkStore`].
pub struct ChunkedTransferAgent<S> {
    store: S,
    retention: Duration,
    clock: fn() -> u64,
}

impl<S: ChunkStore> ChunkedTransferAgent<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retention: DEFAULT_RETENTION,
            clock: unix_millis,
        }
    }

    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Replace the wall clock (milliseconds since the Unix epoch).
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn is_expired(&self, info: &SessionInfo) -> bool {
        let age = (self.clock)().saturating_sub(info.created_at_ms);
        u128::from(age) > self.retention.as_millis()
    }

    fn receipt(info: &SessionInfo, chunks_sent: u64) -> TransferReceipt {
        TransferReceipt {
            session_id: info.session_id.clone(),
            remote: info.remote.clone(),
            bytes: info.total_bytes,
            total_chunks: info.total_chunks,
            chunks_sent,
            digest: info.digest.clone(),
        }
    }

    /// Send every chunk the store has not acknowledged, then complete the session.
    fn drive(&mut self, info: &SessionInfo) -> TransferResult<TransferReceipt> {
        let policy = info.retry;
        let id = info.session_id.as_str();
        let acked = retry_with_backoff(&policy, || self.store.acknowledged(id))?;

        let chunk_len = usize::try_from(info.chunk_size)
            .map_err(|_| TransferError::new(ErrorKind::InvalidInput, "chunk size exceeds address space"))?;
        let mut file = File::open(&info.local_path).map_err(|e| TransferError::local_io(&info.local_path, &e))?;
        let mut buf = Vec::with_capacity(chunk_len);
        let mut sent = 0u64;

        for index in 0..info.total_chunks {
            if acked.contains(&index) {
                continue;
            }
            let offset = index * info.chunk_size;
            let len = info.chunk_size.min(info.total_bytes - offset);
            buf.clear();
            file.seek(SeekFrom::Start(offset))
                .and_then(|_| (&mut file).take(len).read_to_end(&mut buf))
                .map_err(|e| TransferError::local_io(&info.local_path, &e))?;
            if buf.len() as u64 != len {
                return Err(TransferError::new(
                    ErrorKind::InvalidInput,
                    format!("{} shrank while uploading", info.local_path.display()),
                ));
            }
            retry_with_backoff(&policy, || self.store.put_chunk(id, index, &buf))?;
            sent += 1;
            debug!(session = id, chunk = index, bytes = len, "chunk acknowledged");
        }

        retry_with_backoff(&policy, || self.store.complete(id))?;
        info!(
            session = id,
            remote = %info.remote,
            bytes = info.total_bytes,
            chunks = info.total_chunks,
            sent,
            skipped = info.total_chunks - sent,
            "transfer complete"
        );
        Ok(Self::receipt(info, sent))
    }
}

impl<S: ChunkStore> TransferAgent for ChunkedTransferAgent<S> {
    fn upload(
        &mut self,
        local_path: &Path,
        remote: &str,
        chunk_size: u64,
        retry_policy: RetryPolicy,
    ) -> TransferResult<TransferReceipt> {
        validate_remote_key(remote)?;
        if chunk_size == 0 {
            return Err(TransferError::new(ErrorKind::InvalidInput, "chunk size must be positive"));
        }
        let (digest, total_bytes) = file_digest(local_path)?;
        let session_id = session_id(remote, &digest, chunk_size);

        if let Some(existing) = retry_with_backoff(&retry_policy, || self.store.session(&session_id))? {
            if self.is_expired(&existing) {
                warn!(session = %session_id, "session past retention window, restarting");
                retry_with_backoff(&retry_policy, || self.store.discard(&session_id))?;
            } else if retry_with_backoff(&retry_policy, || self.store.is_complete(&session_id))? {
                debug!(session = %session_id, "artifact already delivered");
                return Ok(Self::receipt(&existing, 0));
            } else {
                info!(session = %session_id, "resuming existing session");
                let info = SessionInfo {
                    local_path: local_path.to_path_buf(),
                    retry: retry_policy,
                    ..existing
                };
                return self.drive(&info);
            }
        }

        let info = SessionInfo {
            session_id,
            local_path: local_path.to_path_buf(),
            remote: remote.to_string(),
            chunk_size,
            total_bytes,
            total_chunks: total_bytes.div_ceil(chunk_size),
            digest,
            retry: retry_policy,
            created_at_ms: (self.clock)(),
        };
        retry_with_backoff(&retry_policy, || self.store.begin(&info))?;
        info!(
            session = %info.session_id,
            local = %local_path.display(),
            remote,
            bytes = total_bytes,
            chunks = info.total_chunks,
            "transfer session started"
        );
        self.drive(&info)
    }

    fn resume(&mut self, session_id: &str) -> TransferResult<TransferReceipt> {
        let lookup = RetryPolicy::default();
        let info = retry_with_backoff(&lookup, || self.store.session(session_id))?.ok_or_else(|| {
            TransferError::new(ErrorKind::SessionNotFound, format!("no session {session_id}"))
        })?;
        if self.is_expired(&info) {
            return Err(TransferError::new(
                ErrorKind::SessionExpired,
                format!("session {session_id} is past the retention window"),
            ));
        }
        if retry_with_backoff(&info.retry, || self.store.is_complete(session_id))? {
            return Ok(Self::receipt(&info, 0));
        }
        let (digest, _) = file_digest(&info.local_path)?;
        if digest != info.digest {
            return Err(TransferError::new(
                ErrorKind::DigestMismatch,
                format!("{} changed since session {session_id} began", info.local_path.display()),
            ));
        }
        self.drive(&info)
    }
}

/// Run `operation`, retrying transient failures per `policy`.
///
/// # Errors
///
/// Returns the first non-transient error, or the last error once retries run out.
pub fn retry_with_backoff<T, F>(policy: &RetryPolicy, mut operation: F) -> TransferResult<T>
where
    F: FnMut() -> TransferResult<T>,
{
    let mut retries = 0u32;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.delay_for(retries);
                warn!(error = %err, retry = retries, delay_ms = delay.as_millis() as u64, "transient transfer failure");
                std::thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Streaming SHA-256 of a file as lowercase hex, plus its length.
///
/// # Errors
///
/// Returns [`ErrorKind::LocalIo`] if the file cannot be read.
pub fn file_digest(path: &Path) -> TransferResult<(String, u64)> {
    let file = File::open(path).map_err(|e| TransferError::local_io(path, &e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).map_err(|e| TransferError::local_io(path, &e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), total))
}

/// Stable id for (destination, content, chunking).
#[must_use]
pub fn session_id(remote: &str, digest: &str, chunk_size: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(remote.as_bytes());
    hasher.update([0u8]);
    hasher.update(digest.as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk_size.to_le_bytes());
    let mut id = format!("{:x}", hasher.finalize());
    id.truncate(16);
    id
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
