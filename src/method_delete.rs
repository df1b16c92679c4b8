//! DELETE (C6), SPEC_FULL.md §4.6. Grounded on the reference server's
//! `handle_delete.rs`: recurse into a collection, accumulate each child's
//! outcome into a [`MultiError`], and only then remove the collection
//! itself so a 207 response can still name every child that failed.
//!
//! One deviation from the reference server (DESIGN.md): `Depth` on a
//! collection must be `infinity`; any other depth is rejected outright
//! rather than silently treated as `infinity`, since a gateway fronting a
//! remote object store has no well-defined way to delete "just this
//! collection" while leaving its children in place.

use http::{Request, Response, StatusCode};

use crate::backend::Backend;
use crate::body::Body;
use crate::davheaders::Depth;
use crate::davpath::{DavPath, DavPathRef};
use crate::errors::{DavError, DavResult};
use crate::handler::DavInner;
use crate::multierror::MultiError;
use crate::store::StoreItem;

fn parse_depth(req: &Request<()>) -> DavResult<Depth> {
    match req.headers().get("depth").and_then(|v| v.to_str().ok()) {
        None => Ok(Depth::Infinity),
        Some("infinity") => Ok(Depth::Infinity),
        Some("0") => Ok(Depth::Zero),
        Some("1") => Ok(Depth::One),
        Some(_) => Err(DavError::BadRequest),
    }
}

/// Recursively delete `path`, pushing one entry per visited node into
/// `multi`. Children are attempted independently: one child failing never
/// stops its siblings from being removed.
fn delete_recursive<'a, B: Backend>(
    inner: &'a DavInner<B>,
    path: &'a DavPathRef,
    multi: &'a mut MultiError,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = DavResult<bool>> + Send + 'a>> {
    Box::pin(async move {
        let item = match inner.store.get_item(path).await {
            Ok(item) => item,
            Err(e) => {
                multi.add_status(&inner.full_path(path), e.statuscode());
                return Ok(false);
            },
        };

        if let StoreItem::Collection(_) = item {
            let children = match inner.store.list_items(path).await {
                Ok(c) => c,
                Err(e) => {
                    multi.add_status(&inner.full_path(path), e.statuscode());
                    return Ok(false);
                },
            };

            let mut all_ok = true;
            for child in children {
                let mut child_path = inner.full_path(path);
                child_path.push_segment(child.meta().name.as_bytes());
                child_path.add_slash_if(child.is_collection());
                if !delete_recursive(inner, &child_path, multi).await? {
                    all_ok = false;
                }
            }

            if !all_ok {
                // RFC4918 §9.6.1: a collection is left in place if any
                // descendant could not be removed.
                multi.add_status(&inner.full_path(path), StatusCode::FAILED_DEPENDENCY);
                return Ok(false);
            }
        }

        match inner.store.delete_item(path).await {
            Ok(()) => {
                if let Some(locks) = &inner.locks {
                    locks.clear(path);
                }
                multi.add_status(&inner.full_path(path), StatusCode::NO_CONTENT);
                Ok(true)
            },
            Err(e) => {
                multi.add_status(&inner.full_path(path), e.statuscode());
                Ok(false)
            },
        }
    })
}

pub(crate) async fn handle_delete<B: Backend>(
    inner: &DavInner<B>,
    req: &Request<()>,
    path: &DavPathRef,
) -> DavResult<Response<Body>> {
    let item = inner.store.get_item(path).await?;
    let depth = parse_depth(req)?;
    if item.is_collection() && depth != Depth::Infinity {
        return Err(DavError::Forbidden);
    }

    inner.check_locked(path, true, req.headers())?;

    let mut multi = MultiError::new();
    delete_recursive(inner, path, &mut multi).await?;

    let req_path: DavPath = inner.full_path(path);
    multi.into_response(&req_path)
}
