//! OPTIONS (C6), SPEC_FULL.md §4.6. Grounded on the reference server's
//! `handle_options.rs`: the `Allow:` set is computed per-resource rather
//! than emitted as one static list for every URI.

use http::{Request, Response, StatusCode};

use crate::backend::Backend;
use crate::body::Body;
use crate::davpath::DavPathRef;
use crate::errors::DavResult;
use crate::handler::DavInner;
use crate::util::DavMethod;

pub(crate) async fn handle_options<B: Backend>(
    inner: &DavInner<B>,
    req: &Request<()>,
    path: &DavPathRef,
) -> DavResult<Response<Body>> {
    let mapped = inner.store.get_item(path).await.ok();
    let is_unmapped = mapped.is_none();
    let is_collection = mapped.as_ref().map(|i| i.is_collection()).unwrap_or(false);
    let is_root = path.as_url_string() == "/";

    let allowed = |m: DavMethod| inner.allow.as_ref().map_or(true, |a| a.contains(m));
    let locking = inner.locks.is_some();

    let mut methods: Vec<&str> = Vec::new();
    if is_unmapped && !path.is_star() {
        if allowed(DavMethod::Options) {
            methods.push("OPTIONS");
        }
        if allowed(DavMethod::MkCol) {
            methods.push("MKCOL");
        }
        if allowed(DavMethod::Put) {
            methods.push("PUT");
        }
        if locking && allowed(DavMethod::Lock) {
            methods.push("LOCK");
        }
    } else {
        if !is_collection {
            if allowed(DavMethod::Head) {
                methods.push("HEAD");
            }
            if allowed(DavMethod::Get) {
                methods.push("GET");
            }
            if allowed(DavMethod::Put) {
                methods.push("PUT");
            }
        }
        if allowed(DavMethod::Options) {
            methods.push("OPTIONS");
        }
        if allowed(DavMethod::PropFind) {
            methods.push("PROPFIND");
        }
        if allowed(DavMethod::PropPatch) {
            methods.push("PROPPATCH");
        }
        if allowed(DavMethod::Copy) {
            methods.push("COPY");
        }
        if !is_root {
            if allowed(DavMethod::Move) {
                methods.push("MOVE");
            }
            if allowed(DavMethod::Delete) {
                methods.push("DELETE");
            }
        }
        if locking {
            if allowed(DavMethod::Lock) {
                methods.push("LOCK");
            }
            if allowed(DavMethod::Unlock) {
                methods.push("UNLOCK");
            }
        }
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("dav", "1, 2")
        .header("ms-author-via", "DAV")
        .header("allow", methods.join(", "))
        .header("content-length", "0")
        .body(Body::empty())
        .unwrap())
}
