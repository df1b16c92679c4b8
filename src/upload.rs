//! Resumable chunked upload state machine (C5), SPEC_FULL.md §4.5.
//!
//! PUT bodies at or under [`CHUNK_SIZE`] go through
//! [`Backend::write_bytes`](crate::backend::Backend::write_bytes) directly
//! (the small-file fast path). Larger bodies are split into fixed-size
//! chunks, each part uploaded by a bounded worker pool pulling part numbers
//! off `remainParts`, with per-part credential renewal when a part's
//! `expiration` has less than 30s left, and up to 3 retries per part before
//! the session moves to `Error`.
//!
//! There is no direct reference-server analog for this component (the
//! reference server only ever streams a body straight to a `Write`r); the
//! state machine below follows SPEC_FULL.md §4.5's algorithm description,
//! with the worker-pool/channel shape grounded on `async_stream.rs`'s
//! sender/future pattern.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, Mutex};

use crate::backend::{Backend, BackendError};
use crate::errors::{DavError, DavResult};

/// Fixed part size: 4 MiB.
pub const CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Renew a part's credential if less than this much time remains before its
/// `expiration`.
const RENEW_BUFFER: Duration = Duration::from_secs(30);

const MAX_RETRIES_PER_PART: u32 = 3;

/// Default size of the bounded worker pool used to push parts concurrently.
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct PartCredential {
    pub part_number: u32,
    pub url: String,
    pub credential: String,
    pub expiration: SystemTime,
}

/// `StartChunkUpload`/`RenewChunkUpload` response shape (SPEC_FULL.md §6).
#[derive(Debug, Clone)]
pub struct ChunkCredentials {
    pub confirm_key: String,
    pub parts: Vec<PartCredential>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    NotInit,
    ConfirmKeyInit,
    Ready,
    Uploading,
    Done,
    Error,
}

/// One in-flight or completed chunked upload. Shared state (`remainParts`,
/// `state`) is behind a `Mutex` so worker tasks can pull the next part and
/// report completion without a central coordinator task.
pub struct UploadSession {
    pub path: String,
    pub size: u64,
    pub chunk_count: u32,
    pub confirm_key: String,
    inner: Mutex<Inner>,
}

struct Inner {
    state: UploadState,
    credentials: Vec<PartCredential>,
    remain_parts: VecDeque<u32>,
    in_flight: Vec<u32>,
}

impl UploadSession {
    pub fn new(path: String, size: u64, chunk_count: u32, creds: ChunkCredentials) -> UploadSession {
        let remain_parts = (1..=chunk_count).collect();
        UploadSession {
            path,
            size,
            chunk_count,
            confirm_key: creds.confirm_key,
            inner: Mutex::new(Inner {
                state: UploadState::Ready,
                credentials: creds.parts,
                remain_parts,
                in_flight: Vec::new(),
            }),
        }
    }

    pub async fn state(&self) -> UploadState {
        self.inner.lock().await.state
    }

    /// Drive every remaining part through `backend` with a bounded worker
    /// pool of `workers` concurrent tasks, reading chunk bodies from
    /// `chunk_of` (index 0-based).
    pub async fn run<B: Backend>(
        self: Arc<Self>,
        backend: Arc<B>,
        body: Arc<Vec<u8>>,
        workers: usize,
    ) -> DavResult<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.state = UploadState::Uploading;
        }

        let (tx, mut rx) = mpsc::channel::<DavResult<()>>(workers.max(1));
        for _ in 0..workers.max(1) {
            let session = self.clone();
            let backend = backend.clone();
            let body = body.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = session.worker_loop(&*backend, &body).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut first_err = None;
        while let Some(result) = rx.recv().await {
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }

        let mut inner = self.inner.lock().await;
        if let Some(e) = first_err {
            inner.state = UploadState::Error;
            return Err(e);
        }
        if inner.remain_parts.is_empty() && inner.in_flight.is_empty() {
            backend
                .confirm_upload(&self.confirm_key, None)
                .await
                .map_err(backenderror_to_daverror)?;
            inner.state = UploadState::Done;
        }
        Ok(())
    }

    async fn worker_loop<B: Backend>(&self, backend: &B, body: &[u8]) -> DavResult<()> {
        loop {
            let part_number = {
                let mut inner = self.inner.lock().await;
                match inner.remain_parts.pop_front() {
                    Some(p) => {
                        inner.in_flight.push(p);
                        p
                    },
                    None => return Ok(()),
                }
            };

            let start = (part_number as u64 - 1) * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(body.len() as u64);
            let data = body[start as usize..end as usize].to_vec();

            let mut attempt = 0;
            let outcome: DavResult<()> = loop {
                if let Err(e) = self.renew_if_needed(backend, part_number).await {
                    break Err(e);
                }
                match backend.upload_chunk(&self.confirm_key, part_number, data.clone()).await {
                    Ok(()) => break Ok(()),
                    Err(BackendError::Transient) if attempt < MAX_RETRIES_PER_PART => {
                        attempt += 1;
                        continue;
                    },
                    Err(e) => break Err(backenderror_to_daverror(e)),
                }
            };

            let mut inner = self.inner.lock().await;
            inner.in_flight.retain(|&p| p != part_number);
            // A part that didn't complete goes back on the queue: a failed
            // `run()` must leave `remainParts` accurate so a future resume
            // (`prepare_resume`) picks it back up instead of losing it.
            if let Err(e) = outcome {
                inner.remain_parts.push_back(part_number);
                return Err(e);
            }
        }
    }

    /// True if this session previously failed partway through and can be
    /// resumed on a future PUT to the same path (SPEC_FULL.md §4.5's
    /// `ConfirmKeyInit` step), rather than starting over from part 1.
    pub async fn failed(&self) -> bool {
        self.inner.lock().await.state == UploadState::Error
    }

    /// `Prepare()` from `ConfirmKeyInit` (SPEC_FULL.md §4.5 step 2): renew
    /// credentials for the parts still outstanding, then move back to
    /// `Ready` so `run()` can pick up where the failed attempt left off.
    pub async fn prepare_resume<B: Backend>(&self, backend: &B) -> DavResult<()> {
        let part_numbers: Vec<u32> = {
            let mut inner = self.inner.lock().await;
            inner.state = UploadState::ConfirmKeyInit;
            inner.in_flight.clear();
            inner.remain_parts.iter().take(50).copied().collect()
        };

        let fresh = backend
            .renew_chunk_upload(&self.confirm_key, &part_numbers)
            .await
            .map_err(backenderror_to_daverror)?;

        let mut inner = self.inner.lock().await;
        for c in fresh.parts {
            if let Some(slot) = inner.credentials.iter_mut().find(|x| x.part_number == c.part_number) {
                *slot = c;
            } else {
                inner.credentials.push(c);
            }
        }
        inner.state = UploadState::Ready;
        Ok(())
    }

    async fn renew_if_needed<B: Backend>(&self, backend: &B, part_number: u32) -> DavResult<()> {
        let needs_renew = {
            let inner = self.inner.lock().await;
            match inner.credentials.iter().find(|c| c.part_number == part_number) {
                Some(c) => {
                    let now = SystemTime::now();
                    c.expiration.duration_since(now).map(|d| d < RENEW_BUFFER).unwrap_or(true)
                },
                None => true,
            }
        };
        if !needs_renew {
            return Ok(());
        }
        let fresh = backend
            .renew_chunk_upload(&self.confirm_key, &[part_number])
            .await
            .map_err(backenderror_to_daverror)?;
        let mut inner = self.inner.lock().await;
        for c in fresh.parts {
            if let Some(slot) = inner.credentials.iter_mut().find(|x| x.part_number == c.part_number) {
                *slot = c;
            } else {
                inner.credentials.push(c);
            }
        }
        Ok(())
    }
}

fn backenderror_to_daverror(e: BackendError) -> DavError {
    match e {
        BackendError::NotFound => DavError::NotFound,
        BackendError::Exists | BackendError::Conflict => DavError::Conflict,
        BackendError::Forbidden => DavError::Forbidden,
        BackendError::Transient => DavError::BackendTransient,
        BackendError::Permanent => DavError::BackendPermanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(n: u32) -> ChunkCredentials {
        ChunkCredentials {
            confirm_key: "ck".into(),
            parts: (1..=n)
                .map(|i| PartCredential {
                    part_number: i,
                    url: format!("https://upload.example/{}", i),
                    credential: "tok".into(),
                    expiration: SystemTime::now() + Duration::from_secs(3600),
                })
                .collect(),
        }
    }

    #[test]
    fn new_session_enumerates_all_parts() {
        let session = UploadSession::new("/big.bin".into(), CHUNK_SIZE * 3, 3, creds(3));
        assert_eq!(session.chunk_count, 3);
    }
}
