use anyhow::Result;
use jsonfold::transfer::{
    ChunkStore, ChunkedTransferAgent, DirectoryChunkStore, ErrorKind, MemoryChunkStore,
    RetryPolicy, TransferAgent, file_digest, session_id,
};
use std::fs;
use std::time::Duration;

fn no_wait(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff_base: Duration::ZERO,
        backoff_multiplier: 2.0,
        max_backoff: Duration::ZERO,
    }
}

#[test]
fn interrupted_upload_resumes_in_a_new_agent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let artifact = dir.path().join("merged.csv");
    let body: String = (0..500).map(|i| format!("{i},row {i}\n")).collect();
    fs::write(&artifact, &body)?;

    let store = MemoryChunkStore::new();
    store.fail_puts_after(4);
    let mut first = ChunkedTransferAgent::new(store.clone());
    let err = match first.upload(&artifact, "exports/merged.csv", 512, no_wait(1)) {
        Ok(_) => anyhow::bail!("upload should have been interrupted"),
        Err(err) => err,
    };
    assert!(err.is_transient());

    store.clear_failures();
    let (digest, bytes) = file_digest(&artifact)?;
    let id = session_id("exports/merged.csv", &digest, 512);
    assert_eq!(store.acknowledged(&id)?.len(), 4);

    let mut second = ChunkedTransferAgent::new(store.clone());
    let receipt = second.resume(&id)?;
    assert_eq!(receipt.bytes, bytes);
    assert_eq!(receipt.chunks_sent, receipt.total_chunks - 4);
    assert_eq!(store.object("exports/merged.csv"), Some(body.into_bytes()));
    Ok(())
}

#[test]
fn changed_artifact_is_not_resumed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let artifact = dir.path().join("a.json");
    fs::write(&artifact, "[1,2,3,4,5,6,7,8]")?;

    let store = MemoryChunkStore::new();
    store.fail_puts_after(1);
    let mut agent = ChunkedTransferAgent::new(store.clone());
    assert!(agent.upload(&artifact, "a.json", 4, RetryPolicy::none()).is_err());
    let (digest, _) = file_digest(&artifact)?;

    fs::write(&artifact, "[8,7,6,5,4,3,2,1]")?;
    store.clear_failures();
    let err = match agent.resume(&session_id("a.json", &digest, 4)) {
        Ok(_) => anyhow::bail!("resume should have refused a changed artifact"),
        Err(err) => err,
    };
    assert_eq!(err.kind, ErrorKind::DigestMismatch);
    Ok(())
}

#[test]
fn directory_store_survives_agent_restarts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let artifact = dir.path().join("merged.ndjson");
    fs::write(&artifact, "{\"a\":1}\n{\"a\":2}\n{\"b\":3}\n")?;
    let bucket = dir.path().join("bucket");

    let receipt = ChunkedTransferAgent::new(DirectoryChunkStore::new(&bucket)?)
        .upload(&artifact, "runs/merged.ndjson", 7, RetryPolicy::default())?;
    assert_eq!(receipt.chunks_sent, receipt.total_chunks);

    let mut reopened = ChunkedTransferAgent::new(DirectoryChunkStore::new(&bucket)?);
    let again = reopened.resume(&receipt.session_id)?;
    assert_eq!(again.chunks_sent, 0);
    assert_eq!(fs::read(bucket.join("runs/merged.ndjson"))?, fs::read(&artifact)?);
    Ok(())
}
