//! Resumable, chunked delivery of finished artifacts to remote storage.
//!
//! The ingestion core does not move bytes off the machine itself; it hands finished
//! artifacts to a [`TransferAgent`]. This module defines that contract and a reference
//! agent built on a pluggable [`ChunkStore`]:
//!
//! - [`traits`] - [`TransferAgent`], [`ChunkStore`], [`RetryPolicy`] and the error type
//! - [`agent`] - [`ChunkedTransferAgent`], which splits a file into fixed-size chunks,
//!   skips chunks the store already acknowledged, and retries transient failures with
//!   exponential backoff
//! - [`fake`] - [`MemoryChunkStore`], an in-memory store with failure injection for tests
//! - [`dir`] - [`DirectoryChunkStore`], a store rooted at a directory (a mounted bucket,
//!   a staging volume)
//!
//! ## Delivery guarantees
//!
//! Sessions are keyed by a session id derived from the destination, the artifact's
//! SHA-256 digest and the chunk size. Uploading the same artifact to the same
//! destination again therefore resumes the same session, and every chunk write is
//! idempotent, which gives at-least-once delivery. The store verifies the digest before
//! publishing the assembled object. Sessions older than the agent's retention window
//! are refused on resume and restarted on upload.
//!
//! Retry and backoff live here and only here; the ingestion core never retries.
//!
//! ## Usage
//!
//! ```no_run
//! use jsonfold::transfer::*;
//!
//! # fn main() -> TransferResult<()> {
//! let store = DirectoryChunkStore::new("/mnt/bucket")?;
//! let mut agent = ChunkedTransferAgent::new(store);
//! let receipt = agent.upload(
//!     "out/comments.csv".as_ref(),
//!     "exports/comments.csv",
//!     8 * 1024 * 1024,
//!     RetryPolicy::default(),
//! )?;
//! println!("session {} sent {} chunks", receipt.session_id, receipt.chunks_sent);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod dir;
pub mod fake;
pub mod traits;

pub use agent::*;
pub use dir::*;
pub use fake::*;
pub use traits::*;
