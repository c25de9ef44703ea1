//! In-memory [`ChunkStore`] for tests.
//!
//! Clones share state, so a test can keep a handle while the agent owns another and
//! inject failures between calls.

use super::traits::{ChunkStore, ErrorKind, SessionInfo, TransferError, TransferResult};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<String, SessionInfo>,
    chunks: HashMap<String, BTreeMap<u64, Vec<u8>>>,
    completed: HashSet<String>,
    objects: HashMap<String, Vec<u8>>,
    transient_failures: u32,
    accept_limit: Option<u64>,
    accepted: u64,
    put_calls: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryChunkStore {
    state: Arc<Mutex<State>>,
}

impl MemoryChunkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> TransferResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| TransferError::new(ErrorKind::Other, "memory store lock poisoned"))
    }

    /// Published object at `remote`, if any.
    #[must_use]
    pub fn object(&self, remote: &str) -> Option<Vec<u8>> {
        self.state().ok()?.objects.get(remote).cloned()
    }

    /// Fail the next `n` chunk writes with a transient network error.
    pub fn inject_transient_failures(&self, n: u32) {
        if let Ok(mut state) = self.state() {
            state.transient_failures = n;
        }
    }

    /// Accept `n` more chunk writes, then fail every write until [`Self::clear_failures`].
    pub fn fail_puts_after(&self, n: u64) {
        if let Ok(mut state) = self.state() {
            state.accepted = 0;
            state.accept_limit = Some(n);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state() {
            state.transient_failures = 0;
            state.accept_limit = None;
        }
    }

    /// Chunk writes attempted, failed ones included.
    #[must_use]
    pub fn put_calls(&self) -> u64 {
        self.state().map_or(0, |s| s.put_calls)
    }
}

fn not_found(session_id: &str) -> TransferError {
    TransferError::new(ErrorKind::SessionNotFound, format!("no session {session_id}"))
}

impl ChunkStore for MemoryChunkStore {
    fn session(&self, session_id: &str) -> TransferResult<Option<SessionInfo>> {
        Ok(self.state()?.sessions.get(session_id).cloned())
    }

    fn begin(&mut self, info: &SessionInfo) -> TransferResult<()> {
        let mut state = self.state()?;
        state
            .sessions
            .entry(info.session_id.clone())
            .or_insert_with(|| info.clone());
        state.chunks.entry(info.session_id.clone()).or_default();
        Ok(())
    }

    fn acknowledged(&self, session_id: &str) -> TransferResult<BTreeSet<u64>> {
        let state = self.state()?;
        let chunks = state.chunks.get(session_id).ok_or_else(|| not_found(session_id))?;
        Ok(chunks.keys().copied().collect())
    }

    fn put_chunk(&mut self, session_id: &str, index: u64, data: &[u8]) -> TransferResult<()> {
        let mut state = self.state()?;
        state.put_calls += 1;
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(TransferError::new(ErrorKind::Network, "injected transient failure"));
        }
        if state.accept_limit.is_some_and(|limit| state.accepted >= limit) {
            return Err(TransferError::new(ErrorKind::Network, "connection dropped"));
        }
        state
            .chunks
            .get_mut(session_id)
            .ok_or_else(|| not_found(session_id))?
            .insert(index, data.to_vec());
        state.accepted += 1;
        Ok(())
    }

    fn complete(&mut self, session_id: &str) -> TransferResult<()> {
        let mut state = self.state()?;
        if state.completed.contains(session_id) {
            return Ok(());
        }
        let info = state
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| not_found(session_id))?;
        let chunks = state.chunks.get(session_id).ok_or_else(|| not_found(session_id))?;
        let mut object = Vec::with_capacity(usize::try_from(info.total_bytes).unwrap_or(0));
        for index in 0..info.total_chunks {
            let chunk = chunks.get(&index).ok_or_else(|| {
                TransferError::new(ErrorKind::InvalidInput, format!("chunk {index} missing"))
            })?;
            object.extend_from_slice(chunk);
        }
        if format!("{:x}", Sha256::digest(&object)) != info.digest {
            return Err(TransferError::new(
                ErrorKind::DigestMismatch,
                format!("assembled object for {} does not match digest", info.remote),
            ));
        }
        state.chunks.remove(session_id);
        state.objects.insert(info.remote, object);
        state.completed.insert(session_id.to_string());
        Ok(())
    }

    fn is_complete(&self, session_id: &str) -> TransferResult<bool> {
        Ok(self.state()?.completed.contains(session_id))
    }

    fn discard(&mut self, session_id: &str) -> TransferResult<()> {
        let mut state = self.state()?;
        state.sessions.remove(session_id);
        state.chunks.remove(session_id);
        state.completed.remove(session_id);
        Ok(())
    }
}
