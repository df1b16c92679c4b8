//! `Backend` trait (C4): the seam between [`Store`](crate::store::Store) and
//! the remote object-store service. Grounded on the shape of the reference
//! server's `DavFileSystem` trait, re-scoped to path/item operations plus
//! the chunked-upload contract of SPEC_FULL.md §4.5/§6 — the real
//! collaborator behind this trait is an HTTP object-store client, not a
//! local filesystem, so there is no `open()`/`Read`/`Write`/`Seek` surface
//! here, only whole-buffer and streaming-upload operations.

use std::pin::Pin;

use futures_util::future::Future;

use crate::davpath::DavPathRef;
use crate::store::{DeadProp, StoreItem};
use crate::upload::{ChunkCredentials, UploadSession};

/// Boxed future returned by every `Backend` method, matching the reference
/// server's `FsFuture<T>` pattern (no `async_trait` macro, an explicit
/// lifetime tied to `&self`/the method's borrows instead).
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    NotFound,
    Exists,
    Conflict,
    Forbidden,
    /// Worth a retry (SPEC_FULL.md §7: retried up to 3x by the caller).
    Transient,
    Permanent,
}

/// Everything the gateway needs from the remote object store. Implementors
/// must be `Send + Sync + 'static` so a single instance can be shared across
/// the method handlers behind an `Arc`.
pub trait Backend: Send + Sync + 'static {
    fn get_item<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, StoreItem>;

    fn list_items<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, Vec<StoreItem>>;

    fn create_directory<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, ()>;

    fn delete_item<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, ()>;

    fn move_item<'a>(&'a self, from: &'a DavPathRef, to: &'a DavPathRef) -> BackendFuture<'a, ()>;

    fn read_bytes<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, Vec<u8>>;

    /// Small-file fast path (SPEC_FULL.md §4.5): write the whole body in one
    /// call, bypassing the chunked-upload state machine.
    fn write_bytes<'a>(&'a self, path: &'a DavPathRef, data: Vec<u8>) -> BackendFuture<'a, ()>;

    fn get_quota<'a>(&'a self) -> BackendFuture<'a, (u64, Option<u64>)>;

    fn patch_dead_props<'a>(
        &'a self,
        path: &'a DavPathRef,
        set: Vec<DeadProp>,
        remove: Vec<DeadProp>,
    ) -> BackendFuture<'a, ()>;

    /// `StartChunkUpload`/`RenewChunkUpload` (SPEC_FULL.md §4.5/§6): issue or
    /// refresh per-part URLs/credentials for a chunked upload.
    fn start_chunk_upload<'a>(
        &'a self,
        path: &'a DavPathRef,
        chunk_count: u32,
    ) -> BackendFuture<'a, ChunkCredentials>;

    fn renew_chunk_upload<'a>(
        &'a self,
        confirm_key: &'a str,
        part_numbers: &'a [u32],
    ) -> BackendFuture<'a, ChunkCredentials>;

    fn upload_chunk<'a>(
        &'a self,
        confirm_key: &'a str,
        part_number: u32,
        data: Vec<u8>,
    ) -> BackendFuture<'a, ()>;

    fn confirm_upload<'a>(&'a self, confirm_key: &'a str, crc64: Option<u64>) -> BackendFuture<'a, ()>;
}

/// Convenience extension used by `upload.rs` to drive a session purely in
/// terms of the `Backend` contract.
pub trait BackendUploadExt: Backend {
    fn begin_session<'a>(
        &'a self,
        path: &'a DavPathRef,
        size: u64,
        chunk_size: u64,
    ) -> BackendFuture<'a, UploadSession> {
        Box::pin(async move {
            let chunk_count = ((size + chunk_size - 1) / chunk_size).max(1) as u32;
            let creds = self.start_chunk_upload(path, chunk_count).await?;
            Ok(UploadSession::new(path.as_url_string(), size, chunk_count, creds))
        })
    }
}

impl<T: Backend + ?Sized> BackendUploadExt for T {}
