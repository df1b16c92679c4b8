//! End-to-end scenarios (SPEC_FULL.md §8) driven against `DavHandler` wired
//! up to a bare `MemBackend`, the same way the reference server's own
//! integration tests drive `DavHandler` against `LocalFs`/`MemFs` with a
//! real `http::Request`/`Response` pair rather than calling method handlers
//! directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::StreamExt;
use http::{Request, Response, StatusCode};
use tbox_dav_gateway::backend::{Backend, BackendError, BackendFuture};
use tbox_dav_gateway::body::Body;
use tbox_dav_gateway::davpath::DavPathRef;
use tbox_dav_gateway::lockmanager::LockManager;
use tbox_dav_gateway::membackend::MemBackend;
use tbox_dav_gateway::store::{DeadProp, Store, StoreItem};
use tbox_dav_gateway::{DavHandler, DavMethodSet};

/// Wraps [`MemBackend`], refusing to delete one specific path with
/// `BackendError::Forbidden` while forwarding everything else — simulates
/// the remote store itself rejecting a single child during a collection
/// delete.
struct ForbidDelete {
    inner: MemBackend,
    blocked: String,
}

impl Backend for ForbidDelete {
    fn get_item<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, StoreItem> {
        self.inner.get_item(path)
    }
    fn list_items<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, Vec<StoreItem>> {
        self.inner.list_items(path)
    }
    fn create_directory<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, ()> {
        self.inner.create_directory(path)
    }
    fn delete_item<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, ()> {
        if path.as_url_string() == self.blocked {
            Box::pin(async { Err(BackendError::Forbidden) })
        } else {
            self.inner.delete_item(path)
        }
    }
    fn move_item<'a>(&'a self, from: &'a DavPathRef, to: &'a DavPathRef) -> BackendFuture<'a, ()> {
        self.inner.move_item(from, to)
    }
    fn read_bytes<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, Vec<u8>> {
        self.inner.read_bytes(path)
    }
    fn write_bytes<'a>(&'a self, path: &'a DavPathRef, data: Vec<u8>) -> BackendFuture<'a, ()> {
        self.inner.write_bytes(path, data)
    }
    fn get_quota<'a>(&'a self) -> BackendFuture<'a, (u64, Option<u64>)> {
        self.inner.get_quota()
    }
    fn patch_dead_props<'a>(
        &'a self,
        path: &'a DavPathRef,
        set: Vec<DeadProp>,
        remove: Vec<DeadProp>,
    ) -> BackendFuture<'a, ()> {
        self.inner.patch_dead_props(path, set, remove)
    }
    fn start_chunk_upload<'a>(
        &'a self,
        path: &'a DavPathRef,
        chunk_count: u32,
    ) -> BackendFuture<'a, tbox_dav_gateway::upload::ChunkCredentials> {
        self.inner.start_chunk_upload(path, chunk_count)
    }
    fn renew_chunk_upload<'a>(
        &'a self,
        confirm_key: &'a str,
        part_numbers: &'a [u32],
    ) -> BackendFuture<'a, tbox_dav_gateway::upload::ChunkCredentials> {
        self.inner.renew_chunk_upload(confirm_key, part_numbers)
    }
    fn upload_chunk<'a>(&'a self, confirm_key: &'a str, part_number: u32, data: Vec<u8>) -> BackendFuture<'a, ()> {
        self.inner.upload_chunk(confirm_key, part_number, data)
    }
    fn confirm_upload<'a>(&'a self, confirm_key: &'a str, crc64: Option<u64>) -> BackendFuture<'a, ()> {
        self.inner.confirm_upload(confirm_key, crc64)
    }
}

/// Wraps [`MemBackend`], rejecting exactly one `upload_chunk` call for a
/// given part with `BackendError::Permanent` before reverting to forwarding
/// everything — simulates one interrupted part during a chunked upload
/// that succeeds on a client's retry.
struct FailOncePart {
    inner: MemBackend,
    fail_part: u32,
    tripped: AtomicBool,
}

impl Backend for FailOncePart {
    fn get_item<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, StoreItem> {
        self.inner.get_item(path)
    }
    fn list_items<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, Vec<StoreItem>> {
        self.inner.list_items(path)
    }
    fn create_directory<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, ()> {
        self.inner.create_directory(path)
    }
    fn delete_item<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, ()> {
        self.inner.delete_item(path)
    }
    fn move_item<'a>(&'a self, from: &'a DavPathRef, to: &'a DavPathRef) -> BackendFuture<'a, ()> {
        self.inner.move_item(from, to)
    }
    fn read_bytes<'a>(&'a self, path: &'a DavPathRef) -> BackendFuture<'a, Vec<u8>> {
        self.inner.read_bytes(path)
    }
    fn write_bytes<'a>(&'a self, path: &'a DavPathRef, data: Vec<u8>) -> BackendFuture<'a, ()> {
        self.inner.write_bytes(path, data)
    }
    fn get_quota<'a>(&'a self) -> BackendFuture<'a, (u64, Option<u64>)> {
        self.inner.get_quota()
    }
    fn patch_dead_props<'a>(
        &'a self,
        path: &'a DavPathRef,
        set: Vec<DeadProp>,
        remove: Vec<DeadProp>,
    ) -> BackendFuture<'a, ()> {
        self.inner.patch_dead_props(path, set, remove)
    }
    fn start_chunk_upload<'a>(
        &'a self,
        path: &'a DavPathRef,
        chunk_count: u32,
    ) -> BackendFuture<'a, tbox_dav_gateway::upload::ChunkCredentials> {
        self.inner.start_chunk_upload(path, chunk_count)
    }
    fn renew_chunk_upload<'a>(
        &'a self,
        confirm_key: &'a str,
        part_numbers: &'a [u32],
    ) -> BackendFuture<'a, tbox_dav_gateway::upload::ChunkCredentials> {
        self.inner.renew_chunk_upload(confirm_key, part_numbers)
    }
    fn upload_chunk<'a>(&'a self, confirm_key: &'a str, part_number: u32, data: Vec<u8>) -> BackendFuture<'a, ()> {
        if part_number == self.fail_part && !self.tripped.swap(true, Ordering::SeqCst) {
            return Box::pin(async { Err(BackendError::Permanent) });
        }
        self.inner.upload_chunk(confirm_key, part_number, data)
    }
    fn confirm_upload<'a>(&'a self, confirm_key: &'a str, crc64: Option<u64>) -> BackendFuture<'a, ()> {
        self.inner.confirm_upload(confirm_key, crc64)
    }
}

fn setup() -> DavHandler<MemBackend> {
    let store = Store::new(Arc::new(MemBackend::new()));
    DavHandler::builder()
        .store(store)
        .locksystem(Arc::new(LockManager::new()))
        .allow_methods(DavMethodSet::WEBDAV_RW)
        .build_handler()
}

async fn resp_to_string(mut resp: Response<Body>) -> String {
    let mut data = Vec::new();
    let body = resp.body_mut();
    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk.expect("body stream error"));
    }
    String::from_utf8(data).unwrap_or_default()
}

fn req(method: &str, uri: &str) -> http::request::Builder {
    Request::builder().method(method).uri(uri)
}

#[tokio::test]
async fn s1_propfind_depth_zero_on_collection() {
    let dav = setup();

    let resp = dav.handle(req("MKCOL", "/docs/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Neither prop has ever been set: `displayname` carries no basename
    // fallback (it's pure dead-property storage, same as the reference
    // server), and `getcontentlength` doesn't apply to a collection — both
    // land in the same 404 propstat bucket.
    let body = r#"<propfind xmlns="DAV:"><prop><displayname/><getcontentlength/></prop></propfind>"#;
    let resp = dav
        .handle(req("PROPFIND", "/docs/").header("depth", "0").body(Body::from(body)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert_eq!(text.matches("<D:response>").count(), 1);
    assert!(text.contains("<D:displayname"));
    assert!(text.contains("<D:getcontentlength"));
    assert!(text.contains("HTTP/1.1 404 Not Found"));

    let patch = r#"<propertyupdate xmlns="DAV:"><set><prop><displayname>docs</displayname></prop></set></propertyupdate>"#;
    let resp = dav.handle(req("PROPPATCH", "/docs/").body(Body::from(patch)).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("HTTP/1.1 200 OK"));

    let resp = dav
        .handle(req("PROPFIND", "/docs/").header("depth", "0").body(Body::from(body)).unwrap())
        .await;
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:displayname>docs</D:displayname>"), "PROPPATCH-set displayname must round-trip");
    assert!(text.contains("HTTP/1.1 200 OK"));
}

#[tokio::test]
async fn s2_lock_then_put_with_token() {
    let dav = setup();

    let lockinfo = r#"<lockinfo xmlns="DAV:">
        <lockscope><exclusive/></lockscope>
        <locktype><write/></locktype>
        <owner><href>u</href></owner>
    </lockinfo>"#;
    let resp = dav
        .handle(req("LOCK", "/a.txt").header("timeout", "Second-60").body(Body::from(lockinfo)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let token = resp.headers().get("lock-token").and_then(|v| v.to_str().ok()).expect("Lock-Token header").to_string();
    assert!(token.starts_with("<opaquelocktoken:"));

    let resp = dav.handle(req("PUT", "/a.txt").body(Body::from("hello")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    let resp = dav
        .handle(req("PUT", "/a.txt").header("if", format!("({})", token)).body(Body::from("hello")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn s3_resumable_put_recovers_after_one_failed_part() {
    let backend = FailOncePart { inner: MemBackend::new(), fail_part: 3, tripped: AtomicBool::new(false) };
    let store = Store::new(Arc::new(backend));
    let dav = DavHandler::builder()
        .store(store)
        .locksystem(Arc::new(LockManager::new()))
        .allow_methods(DavMethodSet::WEBDAV_RW)
        .build_handler();

    // 3 chunks of 4 MiB: part 3 fails on its first attempt.
    let body = vec![7u8; 12 * 1024 * 1024];

    let resp = dav.handle(req("PUT", "/big.bin").body(Body::from(body.clone())).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let resp = dav.handle(req("GET", "/big.bin").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND, "a failed upload must not leave a partial resource visible");

    // Same PUT again: the session resumes from its parked `Error` state,
    // renews credentials for the remaining part and finishes the upload.
    let resp = dav.handle(req("PUT", "/big.bin").body(Body::from(body.clone())).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = dav.handle(req("GET", "/big.bin").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp_to_string(resp).await.len(), body.len());
}

#[tokio::test]
async fn s4_move_overwrite_denied() {
    let dav = setup();

    let resp = dav.handle(req("PUT", "/a").body(Body::from("aaa")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = dav.handle(req("PUT", "/b").body(Body::from("bbb")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = dav
        .handle(req("MOVE", "/a").header("destination", "/b").header("overwrite", "F").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    let resp = dav.handle(req("GET", "/a").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp_to_string(resp).await, "aaa");

    let resp = dav.handle(req("GET", "/b").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp_to_string(resp).await, "bbb");
}

#[tokio::test]
async fn s5_delete_collection_with_one_failing_child() {
    let backend = ForbidDelete { inner: MemBackend::new(), blocked: "/docs/stuck.txt".to_string() };
    let store = Store::new(Arc::new(backend));
    let dav = DavHandler::builder()
        .store(store)
        .locksystem(Arc::new(LockManager::new()))
        .allow_methods(DavMethodSet::WEBDAV_RW)
        .build_handler();

    let resp = dav.handle(req("MKCOL", "/docs/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = dav.handle(req("PUT", "/docs/ok.txt").body(Body::from("fine")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = dav.handle(req("PUT", "/docs/stuck.txt").body(Body::from("stuck")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = dav.handle(req("DELETE", "/docs/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("/docs/stuck.txt"));
    assert!(text.contains("403"));

    let resp = dav.handle(req("GET", "/docs/ok.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = dav.handle(req("GET", "/docs/stuck.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK, "a failing child must survive the collection delete");
}

#[tokio::test]
async fn s6_lock_expiry() {
    let dav = setup();

    let resp = dav.handle(req("PUT", "/a.txt").body(Body::from("x")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let lockinfo = r#"<lockinfo xmlns="DAV:">
        <lockscope><exclusive/></lockscope>
        <locktype><write/></locktype>
        <owner><href>u</href></owner>
    </lockinfo>"#;
    let resp = dav
        .handle(req("LOCK", "/a.txt").header("timeout", "Second-1").body(Body::from(lockinfo)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = resp.headers().get("lock-token").unwrap().to_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let resp = dav.handle(req("UNLOCK", "/a.txt").header("lock-token", token.clone()).body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = dav.handle(req("LOCK", "/a.txt").body(Body::from(lockinfo)).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK, "an expired lock must not block a fresh one");
}

#[tokio::test]
async fn mkcol_rejects_existing_target() {
    let dav = setup();
    let resp = dav.handle(req("MKCOL", "/docs/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = dav.handle(req("MKCOL", "/docs/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn mkcol_rejects_missing_parent() {
    let dav = setup();
    let resp = dav.handle(req("MKCOL", "/a/b/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn copy_depth_zero_onto_existing_collection_preserves_children() {
    let dav = setup();
    let resp = dav.handle(req("MKCOL", "/src/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = dav.handle(req("PUT", "/src/child.txt").body(Body::from("c")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = dav.handle(req("MKCOL", "/dst/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = dav.handle(req("PUT", "/dst/keep.txt").body(Body::from("k")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = dav
        .handle(req("COPY", "/src/").header("destination", "/dst/").header("depth", "0").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = dav.handle(req("GET", "/dst/keep.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK, "Depth:0 COPY onto an existing collection must not wipe it");
}

#[tokio::test]
async fn options_lists_allowed_methods_for_a_file() {
    let dav = setup();
    let resp = dav.handle(req("PUT", "/a.txt").body(Body::from("x")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = dav.handle(req("OPTIONS", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let allow = resp.headers().get("allow").unwrap().to_str().unwrap().to_string();
    assert!(allow.contains("GET"));
    assert!(allow.contains("PUT"));
    assert!(allow.contains("DELETE"));
    assert!(allow.contains("LOCK"));
}

#[tokio::test]
async fn read_only_access_mode_rejects_writes() {
    let store = Store::new(Arc::new(MemBackend::new()));
    let dav = DavHandler::builder()
        .store(store)
        .locksystem(Arc::new(LockManager::new()))
        .allow_methods(DavMethodSet::WEBDAV_RO)
        .build_handler();

    let resp = dav.handle(req("PUT", "/a.txt").body(Body::from("x")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    let resp = dav.handle(req("PROPFIND", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
}
