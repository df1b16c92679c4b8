//! Top-level dispatcher (C7), SPEC_FULL.md §4.7. Grounded on the reference
//! server's `davhandler.rs`: the public `DavHandler`/`DavConfig` builder
//! pair wraps a per-request `DavInner<B>` that actually does the work, and
//! `DavInner::handle` turns every `DavError` into an HTTP response so the
//! public entry point never propagates one.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Buf;
use futures_util::stream::{Stream, StreamExt};
use http::{HeaderMap, Request, Response, StatusCode};

use crate::backend::Backend;
use crate::body::{Body, StreamBody};
use crate::conditional;
use crate::davpath::{DavPath, DavPathRef};
use crate::errors::{DavError, DavResult};
use crate::lockmanager::{Lock, LockManager};
use crate::store::Store;
use crate::upload::UploadSession;
use crate::util::{dav_method, dav_xml_error, DavMethod, DavMethodSet};
use crate::{method_copymove, method_delete, method_get, method_lock, method_mkcol, method_options, method_props, method_put};

/// Request bodies that aren't PUT/PATCH are buffered up to this many bytes
/// (an XML document never needs to be larger than this).
const MAX_XML_BODY: usize = 65536;

/// PUT/PATCH bodies are buffered in full (the in-memory backend and the
/// chunked-upload session both operate on owned byte buffers), bounded only
/// by this sanity ceiling.
const MAX_PUT_BODY: usize = 1024 * 1024 * 1024 * 4;

/// The webdav handler. Cheap to clone — everything behind it is `Arc`'d.
#[derive(Clone)]
pub struct DavHandler<B: Backend> {
    inner: Arc<DavInner<B>>,
}

/// Builder for [`DavHandler`].
pub struct DavConfig<B: Backend> {
    prefix: Option<String>,
    store: Option<Store<B>>,
    locks: Option<Arc<LockManager>>,
    allow: Option<DavMethodSet>,
    upload_workers: usize,
}

impl<B: Backend> DavConfig<B> {
    pub fn new() -> DavConfig<B> {
        DavConfig { prefix: None, store: None, locks: None, allow: None, upload_workers: crate::upload::DEFAULT_WORKERS }
    }

    /// Prefix to strip off the request path before treating the rest as a
    /// store path (the gateway's mount point).
    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn store(mut self, store: Store<B>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn locksystem(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Which methods to allow (default is all methods).
    pub fn allow_methods(mut self, allow: DavMethodSet) -> Self {
        self.allow = Some(allow);
        self
    }

    /// Size of the bounded worker pool used to drive chunked uploads.
    pub fn upload_workers(mut self, n: usize) -> Self {
        self.upload_workers = n.max(1);
        self
    }

    pub fn build_handler(self) -> DavHandler<B> {
        DavHandler {
            inner: Arc::new(DavInner {
                prefix: self.prefix.unwrap_or_default(),
                store: self.store.expect("DavConfig::store() is required"),
                locks: self.locks,
                allow: self.allow,
                upload_workers: self.upload_workers,
                upload_sessions: StdMutex::new(HashMap::new()),
            }),
        }
    }
}

/// Per-request state: the store, lock manager and configuration every
/// method handler needs. Not `Clone` — handlers borrow it for the duration
/// of one request.
pub(crate) struct DavInner<B: Backend> {
    pub(crate) prefix: String,
    pub(crate) store: Store<B>,
    pub(crate) locks: Option<Arc<LockManager>>,
    pub(crate) allow: Option<DavMethodSet>,
    pub(crate) upload_workers: usize,
    /// Failed chunked-upload sessions parked by path, so a repeat `PUT` to
    /// the same resource resumes instead of restarting (SPEC_FULL.md §4.5,
    /// scenario S3). A session is removed once it reaches `Done`.
    upload_sessions: StdMutex<HashMap<String, Arc<UploadSession>>>,
}

impl<B: Backend> DavInner<B> {
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<DavPath> {
        Ok(DavPath::from_uri(req.uri(), &self.prefix)?)
    }

    /// Re-attach the mount prefix to a bare `&DavPathRef`, for building
    /// `<D:href>`s in multistatus responses from a path a recursive walk
    /// only holds by reference.
    pub(crate) fn full_path(&self, path: &DavPathRef) -> DavPath {
        let src = format!("{}{}", self.prefix, path.as_url_string());
        DavPath::from_str_and_prefix(&src, &self.prefix).expect("prefix always matches its own path")
    }

    /// `CheckLock` (SPEC_FULL.md §4.3): does the client's `If:` header cover
    /// every lock conflicting with this operation? No lock manager means no
    /// locks exist, so every operation trivially passes.
    pub(crate) fn check_locked(&self, path: &DavPathRef, deep: bool, headers: &HeaderMap) -> DavResult<()> {
        let locks = match &self.locks {
            Some(l) => l,
            None => return Ok(()),
        };
        let tokens = conditional::if_tokens(headers);
        let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        locks.check(path, deep, &refs).map_err(|_: Lock| DavError::Locked)
    }

    /// A previously failed session parked under `key`, if any (SPEC_FULL.md
    /// §4.5 `ConfirmKeyInit` resume).
    pub(crate) fn parked_session(&self, key: &str) -> Option<Arc<UploadSession>> {
        self.upload_sessions.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn park_session(&self, key: String, session: Arc<UploadSession>) {
        self.upload_sessions.lock().unwrap().insert(key, session);
    }

    pub(crate) fn forget_session(&self, key: &str) {
        self.upload_sessions.lock().unwrap().remove(key);
    }
}

impl<B: Backend> DavHandler<B> {
    pub fn builder() -> DavConfig<B> {
        DavConfig::new()
    }

    /// Handle one webdav request. Always produces a response: `DavError`s
    /// are converted to a status-only response here, matching the
    /// propagation policy of SPEC_FULL.md §7 (uncaught errors never leak a
    /// body, only a status code).
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: http_body::Body<Data = ReqData, Error = ReqError> + Send,
    {
        let is_ms = req
            .headers()
            .get("user-agent")
            .and_then(|s| s.to_str().ok())
            .map(|s| s.contains("Microsoft"))
            .unwrap_or(false);

        match self.inner.clone().handle2(req).await {
            Ok(resp) => {
                log::debug!("== END REQUEST result OK");
                resp
            },
            Err(err) => {
                log::debug!("== END REQUEST result {:?}", err);
                let status = err.statuscode();
                if status.is_server_error() {
                    log::error!("request failed: {}", err);
                } else if status.is_client_error() {
                    log::warn!("request rejected: {}", err);
                }
                let mut resp = Response::builder();
                if is_ms && status == StatusCode::NOT_FOUND {
                    // Discourage Windows from caching a case-insensitive
                    // NOT_FOUND for 30-60s (SPEC_FULL.md §4.7 quirk list).
                    resp = resp
                        .header("cache-control", "no-store, no-cache, must-revalidate")
                        .header("pragma", "no-cache")
                        .header("expires", "0")
                        .header("vary", "*");
                }
                resp = resp.status(status);
                if err.must_close() {
                    resp = resp.header("connection", "close");
                }
                let body = if status.is_server_error() { Body::empty() } else { dav_xml_error("") };
                resp.body(body).unwrap()
            },
        }
    }
}

impl<B: Backend> DavInner<B> {
    async fn handle2<ReqBody, ReqData, ReqError>(self: Arc<Self>, req: Request<ReqBody>) -> DavResult<Response<Body>>
    where
        ReqData: Buf + Send,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: http_body::Body<Data = ReqData, Error = ReqError> + Send,
    {
        let (parts, body) = req.into_parts();
        let req = Request::from_parts(parts, ());

        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("refusing method {} on {}", req.method(), req.uri());
                return Err(e);
            },
        };

        if let Some(ref allow) = self.allow {
            if !allow.contains(method) {
                return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
            }
        }

        let path = self.path(&req)?;
        log::debug!("== START REQUEST {:?} {}", method, path.as_url_string());

        match method {
            DavMethod::Put | DavMethod::Patch => {
                let max = MAX_PUT_BODY;
                let data = read_body(body, max).await?;
                method_put::handle_put(&self, &req, &path, method == DavMethod::Patch, data).await
            },
            _ => {
                let data = read_body(body, MAX_XML_BODY).await?;
                match method {
                    DavMethod::Options => method_options::handle_options(&self, &req, &path).await,
                    DavMethod::PropFind => method_props::handle_propfind(&self, &req, &path, data).await,
                    DavMethod::PropPatch => method_props::handle_proppatch(&self, &req, &path, data).await,
                    DavMethod::MkCol => {
                        if !data.is_empty() {
                            return Err(DavError::UnsupportedMediaType);
                        }
                        method_mkcol::handle_mkcol(&self, &req, &path).await
                    },
                    DavMethod::Delete => method_delete::handle_delete(&self, &req, &path).await,
                    DavMethod::Copy | DavMethod::Move => {
                        method_copymove::handle_copymove(&self, &req, &path, method == DavMethod::Move).await
                    },
                    DavMethod::Lock => method_lock::handle_lock(&self, &req, &path, data).await,
                    DavMethod::Unlock => method_lock::handle_unlock(&self, &req, &path).await,
                    DavMethod::Head => method_get::handle_gethead(&self, &req, &path, true).await,
                    DavMethod::Get => method_get::handle_gethead(&self, &req, &path, false).await,
                    DavMethod::Put | DavMethod::Patch => unreachable!(),
                }
            },
        }
    }
}

async fn read_body<ReqBody, ReqData, ReqError>(body: ReqBody, max_size: usize) -> DavResult<Vec<u8>>
where
    ReqData: Buf + Send,
    ReqError: StdError + Send + Sync + 'static,
    ReqBody: http_body::Body<Data = ReqData, Error = ReqError> + Send,
{
    use http_body_util::BodyStream;

    let mut data = Vec::new();
    let mut stream = Box::pin(BodyStream::new(body));
    while let Some(res) = stream.next().await {
        let frame = res.map_err(|_| DavError::IoError(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "UnexpectedEof")))?;
        let Ok(mut buf) = frame.into_data() else { continue };
        if data.len() + buf.remaining() > max_size {
            return Err(DavError::Status(StatusCode::PAYLOAD_TOO_LARGE));
        }
        while buf.has_remaining() {
            let chunk = buf.chunk();
            let len = chunk.len();
            data.extend_from_slice(chunk);
            buf.advance(len);
        }
    }
    Ok(data)
}

// Kept for method handlers that need to re-wrap a raw byte stream as an
// http_body::Body (none currently do, since every body is read eagerly
// above, but the type is part of C1's plumbing and used by tests).
#[allow(dead_code)]
pub(crate) fn stream_body<S>(s: S) -> StreamBody<S>
where S: Stream<Item = Result<bytes::Bytes, std::io::Error>> {
    StreamBody::new(s)
}
