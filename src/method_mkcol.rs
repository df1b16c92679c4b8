//! MKCOL (C6), SPEC_FULL.md §4.6. Grounded on the reference server's
//! `handle_mkcol.rs`: lock check, then create, with RFC4918 §9.3.1's status
//! mapping (`405` if the target already exists, `409` if the parent is
//! missing).
//!
//! Unlike [`crate::store::Store::create_collection`] (used internally to
//! forgivingly ensure a directory exists), MKCOL itself must reject an
//! already-existing target outright (SPEC_FULL.md §4.6), so this handler
//! calls the backend directly rather than going through that helper.

use http::{Response, StatusCode};

use crate::backend::{Backend, BackendError};
use crate::body::Body;
use crate::davpath::DavPathRef;
use crate::errors::{DavError, DavResult};
use crate::handler::DavInner;

pub(crate) async fn handle_mkcol<B: Backend>(
    inner: &DavInner<B>,
    req: &http::Request<()>,
    path: &DavPathRef,
) -> DavResult<Response<Body>> {
    inner.check_locked(path, false, req.headers())?;

    match inner.store.backend().create_directory(path).await {
        // RFC4918 9.3.1 MKCOL Status Codes: target already exists => 405;
        // parent missing => 409 (SPEC_FULL.md §4.6).
        Err(BackendError::Exists) => Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED)),
        Err(BackendError::Conflict) | Err(BackendError::NotFound) => Err(DavError::Conflict),
        Err(BackendError::Forbidden) => Err(DavError::Forbidden),
        Err(BackendError::Transient) => Err(DavError::BackendTransient),
        Err(BackendError::Permanent) => Err(DavError::BackendPermanent),
        Ok(()) => {
            let mut loc = inner.full_path(path);
            loc.add_slash();
            Ok(Response::builder()
                .status(StatusCode::CREATED)
                .header("content-location", loc.as_url_string_with_prefix())
                .body(Body::empty())
                .unwrap())
        },
    }
}
