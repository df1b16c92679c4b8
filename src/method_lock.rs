//! LOCK/UNLOCK (C6), SPEC_FULL.md §4.6. Grounded on the reference server's
//! `handle_lock.rs`: empty body means "refresh", otherwise parse a
//! `<lockinfo>` document and take out a new lock, creating the target
//! resource first if it didn't already exist. A flat 600s timeout cap
//! applies to both scopes (SPEC_FULL.md §4.1's `MAX_LOCK_TIMEOUT`), unlike
//! the reference server's wider 24h allowance for shared locks.

use std::cmp;
use std::io::Cursor;
use std::time::Duration;

use headers::Header;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::backend::Backend;
use crate::body::Body;
use crate::conditional::check_etag_preconditions;
use crate::davheaders::{self, Depth, Timeout};
use crate::davpath::DavPathRef;
use crate::errors::{DavError, DavResult};
use crate::handler::DavInner;
use crate::lockmanager::Lock;
use crate::xmlutil::ElementExt;

/// SPEC_FULL.md §4.1: the longest timeout granted to any lock, regardless
/// of scope.
const MAX_LOCK_TIMEOUT: Duration = Duration::from_secs(600);

pub(crate) async fn handle_lock<B: Backend>(
    inner: &DavInner<B>,
    req: &Request<()>,
    path: &DavPathRef,
    body: Vec<u8>,
) -> DavResult<Response<Body>> {
    let locks = inner.locks.as_ref().ok_or(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED))?;

    let existing = match inner.store.get_item(path).await {
        Ok(item) => Some(item),
        Err(DavError::NotFound) => None,
        Err(e) => return Err(e),
    };

    if body.is_empty() {
        let tokens = crate::conditional::if_tokens(req.headers());
        if tokens.len() != 1 {
            return Err(DavError::BadRequest);
        }
        let timeout = get_timeout(req)?;
        let lock = locks.refresh(path, &tokens[0], timeout).ok_or(DavError::PreconditionFailed)?;
        return lock_response(&lock, StatusCode::OK, false);
    }

    let deep = match req.headers().get("depth").and_then(|v| v.to_str().ok()) {
        None => true,
        Some(v) => match Depth::decode(&mut std::iter::once(&http::HeaderValue::from_str(v).unwrap()))
            .map_err(|_| DavError::BadRequest)?
        {
            Depth::Infinity => true,
            Depth::Zero => false,
            Depth::One => return Err(DavError::BadRequest),
        },
    };

    let current_etag = existing.as_ref().map(|item| item.meta().etag.clone());
    if let Some(status) = check_etag_preconditions(req.headers(), current_etag.as_deref()) {
        return Err(DavError::Status(status));
    }

    let tree = xmltree::Element::parse2(Cursor::new(body))?;
    if tree.name != "lockinfo" {
        return Err(DavError::XmlParseError);
    }

    let mut shared: Option<bool> = None;
    let mut owner: Option<Element> = None;
    let mut locktype = false;

    for elem in tree.children {
        let elem = match elem {
            xmltree::XMLNode::Element(e) => e,
            _ => continue,
        };
        match elem.name.as_str() {
            "lockscope" if elem.children.len() == 1 => {
                let xmltree::XMLNode::Element(ref child) = elem.children[0] else { return Err(DavError::XmlParseError) };
                match child.name.as_str() {
                    "exclusive" => shared = Some(false),
                    "shared" => shared = Some(true),
                    _ => return Err(DavError::XmlParseError),
                }
            },
            "locktype" if elem.children.len() == 1 => {
                let xmltree::XMLNode::Element(ref child) = elem.children[0] else { return Err(DavError::XmlParseError) };
                match child.name.as_str() {
                    "write" => locktype = true,
                    _ => return Err(DavError::XmlParseError),
                }
            },
            "owner" => {
                let mut o = elem.clone();
                o.prefix = Some("D".to_owned());
                owner = Some(o);
            },
            _ => return Err(DavError::XmlParseError),
        }
    }

    let shared = match shared {
        Some(s) if locktype => s,
        _ => return Err(DavError::XmlParseError),
    };

    let timeout = get_timeout(req)?;
    let lock = locks.lock(path, owner, timeout, shared, deep).map_err(|_| DavError::Locked)?;

    if existing.is_none() {
        if let Err(e) = inner.store.write_bytes(path, Vec::new()).await {
            locks.unlock(path, &lock.token);
            return Err(e);
        }
    }

    let status = if existing.is_none() { StatusCode::CREATED } else { StatusCode::OK };
    lock_response(&lock, status, true)
}

pub(crate) async fn handle_unlock<B: Backend>(
    inner: &DavInner<B>,
    req: &Request<()>,
    path: &DavPathRef,
) -> DavResult<Response<Body>> {
    let locks = inner.locks.as_ref().ok_or(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED))?;
    let header = req.headers().get("lock-token").and_then(|v| v.to_str().ok()).ok_or(DavError::BadRequest)?;
    let token = header.trim_matches(|c| c == '<' || c == '>');

    if locks.unlock(path, token) {
        Ok(Response::builder().status(StatusCode::NO_CONTENT).body(Body::empty()).unwrap())
    } else {
        Err(DavError::Conflict)
    }
}

fn get_timeout(req: &Request<()>) -> DavResult<Option<Duration>> {
    let hdr = match req.headers().get("timeout").and_then(|v| v.to_str().ok()) {
        Some(h) => h,
        None => return Ok(None),
    };
    let value = http::HeaderValue::from_str(hdr).map_err(|_| DavError::BadRequest)?;
    let parsed = Timeout::decode(&mut std::iter::once(&value)).map_err(|_| DavError::BadRequest)?;
    match parsed.0.first() {
        Some(davheaders::DavTimeout::Infinite) | None => Ok(Some(MAX_LOCK_TIMEOUT)),
        Some(davheaders::DavTimeout::Seconds(n)) => Ok(Some(cmp::min(MAX_LOCK_TIMEOUT, Duration::from_secs(*n as u64)))),
    }
}

/// `fresh` marks a newly minted lock (as opposed to a refresh): only then
/// does the response carry a `Lock-Token` header, matching the reference
/// server's `handle_lock.rs` (the refresh branch never sets it).
fn lock_response(lock: &Lock, status: StatusCode, fresh: bool) -> DavResult<Response<Body>> {
    let active = crate::lockmanager::active_lock_element(lock);
    let mut ldis = Element::new2("D:lockdiscovery");
    ldis.push(active);
    let mut prop = Element::new2("D:prop").ns("D", "DAV:");
    prop.push(ldis);

    let mut buf = Vec::new();
    {
        let mut emitter = crate::xmlutil::emitter(&mut buf)?;
        prop.write_ev(&mut emitter)?;
    }

    let mut builder = Response::builder().status(status).header("content-type", "application/xml; charset=utf-8");
    if fresh {
        builder = builder.header("lock-token", format!("<{}>", lock.token));
    }
    Ok(builder.body(Body::from(buf)).unwrap())
}
