//! Core traits and types for artifact transfer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Core Error Type
// ============================================================================

/// Error raised by transfer agents and chunk stores.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct TransferError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Session id unknown to the store.
    SessionNotFound,
    /// Session older than the retention window.
    SessionExpired,
    /// Assembled object does not match the artifact digest.
    DigestMismatch,
    InvalidInput,
    /// Local file could not be read.
    LocalIo,
    Network,
    Timeout,
    ServiceUnavailable,
    RateLimited,
    Other,
}

impl TransferError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::ServiceUnavailable | ErrorKind::RateLimited
        )
    }

    pub(crate) fn local_io(path: &Path, err: &std::io::Error) -> Self {
        Self::new(ErrorKind::LocalIo, format!("{}: {err}", path.display()))
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

// ============================================================================
// Retry Policy
// ============================================================================

/// Exponential backoff applied to every store call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff_base: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.backoff_base.as_secs_f64() * self.backoff_multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

// ============================================================================
// Sessions and Receipts
// ============================================================================

/// Everything needed to (re)drive a transfer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub local_path: PathBuf,
    pub remote: String,
    pub chunk_size: u64,
    pub total_bytes: u64,
    pub total_chunks: u64,
    /// Lowercase hex SHA-256 of the artifact.
    pub digest: String,
    pub retry: RetryPolicy,
    /// Unix time in milliseconds.
    pub created_at_ms: u64,
}

/// Outcome of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub session_id: String,
    pub remote: String,
    pub bytes: u64,
    pub total_chunks: u64,
    /// Chunks sent by this call; chunks acknowledged earlier are not re-sent.
    pub chunks_sent: u64,
    pub digest: String,
}

// ============================================================================
// TransferAgent
// ============================================================================

/// Moves a finished local artifact to remote storage.
pub trait TransferAgent {
    /// Upload `local_path` to `remote` in chunks of `chunk_size` bytes.
    ///
    /// Re-uploading an artifact whose session is still live resumes that session.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be read, the arguments are invalid, or a
    /// store call still fails after the retry policy is exhausted
    fn upload(
        &mut self,
        local_path: &Path,
        remote: &str,
        chunk_size: u64,
        retry_policy: RetryPolicy,
    ) -> TransferResult<TransferReceipt>;

    /// Continue an interrupted session without re-sending acknowledged chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unknown or expired, the local artifact changed
    /// since the session began, or a store call still fails after retries
    fn resume(&mut self, session_id: &str) -> TransferResult<TransferReceipt>;
}

// ============================================================================
// ChunkStore
// ============================================================================

/// Remote side of a chunked transfer.
///
/// Every method must be idempotent: the agent may repeat any call after a failure.
pub trait ChunkStore {
    /// Look up a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached
    fn session(&self, session_id: &str) -> TransferResult<Option<SessionInfo>>;

    /// Register a session (no-op if it already exists).
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be recorded
    fn begin(&mut self, info: &SessionInfo) -> TransferResult<()>;

    /// Indices of chunks already stored for a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unknown or the store cannot be reached
    fn acknowledged(&self, session_id: &str) -> TransferResult<BTreeSet<u64>>;

    /// Store one chunk, replacing any previous copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unknown or the write fails
    fn put_chunk(&mut self, session_id: &str, index: u64, data: &[u8]) -> TransferResult<()>;

    /// Assemble all chunks, verify the digest and publish the object at the remote key.
    ///
    /// # Errors
    ///
    /// Returns an error if chunks are missing, the digest does not match, or publishing fails
    fn complete(&mut self, session_id: &str) -> TransferResult<()>;

    /// Whether the session was completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached
    fn is_complete(&self, session_id: &str) -> TransferResult<bool>;

    /// Forget a session and its chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached
    fn discard(&mut self, session_id: &str) -> TransferResult<()>;
}

/// Reject remote keys that are empty, absolute or climb out of the store root.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidInput`] for such keys.
pub fn validate_remote_key(remote: &str) -> TransferResult<()> {
    if remote.is_empty() {
        return Err(TransferError::new(ErrorKind::InvalidInput, "remote key is empty"));
    }
    if remote.starts_with('/') || remote.split('/').any(|part| part == "..") {
        return Err(TransferError::new(
            ErrorKind::InvalidInput,
            format!("remote key must be relative without '..': {remote}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let p = RetryPolicy {
            max_retries: 10,
            backoff_base: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(4), Duration::from_millis(500));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn remote_keys_are_validated() {
        assert!(validate_remote_key("exports/a.csv").is_ok());
        assert!(validate_remote_key("").is_err());
        assert!(validate_remote_key("/abs").is_err());
        assert!(validate_remote_key("a/../../b").is_err());
    }
}
