//! COPY/MOVE (C6), SPEC_FULL.md §4.6. Grounded on the reference server's
//! `handle_copymove.rs`: parse `Destination`/`Overwrite`/`Depth`, delete an
//! existing, overwritable destination first, then copy (recursively, per
//! child) or move (a single `Store::move_item` call) the source onto it.
//!
//! One deviation from the reference server (DESIGN.md): `Depth: 0` is only
//! ever accepted for COPY; MOVE always requires `infinity`, matching
//! SPEC_FULL.md's explicit rule rather than silently promoting a MOVE's
//! `Depth: 0` to `infinity`.

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::backend::Backend;
use crate::body::Body;
use crate::davheaders::{Depth, Destination, Overwrite};
use crate::davpath::{DavPath, DavPathRef};
use crate::errors::{DavError, DavResult};
use crate::handler::DavInner;
use crate::multierror::MultiError;
use crate::store::StoreItem;

/// `DavPathRef` has no `PartialEq` (it has no notion of a prefix to make
/// comparable); compare the decoded bytes directly, ignoring a trailing
/// slash the way [`DavPath`]'s own equality does.
fn same_path(a: &DavPathRef, b: &DavPathRef) -> bool {
    let trim = |s: &[u8]| if s.len() > 1 && s.ends_with(b"/") { &s[..s.len() - 1] } else { s };
    trim(a.as_bytes()) == trim(b.as_bytes())
}

fn parse_depth(req: &Request<()>, is_move: bool) -> DavResult<Depth> {
    match req.headers().typed_get::<Depth>() {
        None | Some(Depth::Infinity) => Ok(Depth::Infinity),
        Some(Depth::Zero) if !is_move => Ok(Depth::Zero),
        _ => Err(DavError::BadRequest),
    }
}

fn parse_destination<B: Backend>(inner: &DavInner<B>, req: &Request<()>) -> DavResult<DavPath> {
    let dest = req.headers().typed_get::<Destination>().ok_or(DavError::BadRequest)?;
    Ok(DavPath::from_str_and_prefix(&dest.0, &inner.prefix)?)
}

/// Recursively copy `source` onto `dest`, pushing a status entry per failed
/// node into `multi`. A child failing never stops its siblings.
fn copy_recursive<'a, B: Backend>(
    inner: &'a DavInner<B>,
    source: &'a DavPathRef,
    dest: &'a DavPathRef,
    depth: Depth,
    multi: &'a mut MultiError,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = DavResult<bool>> + Send + 'a>> {
    Box::pin(async move {
        let item = match inner.store.get_item(source).await {
            Ok(item) => item,
            Err(e) => {
                multi.add_status(&inner.full_path(source), e.statuscode());
                return Ok(false);
            },
        };

        if !item.is_collection() {
            let bytes = match inner.store.read_bytes(source).await {
                Ok(b) => b,
                Err(e) => {
                    multi.add_status(&inner.full_path(dest), e.statuscode());
                    return Ok(false);
                },
            };
            return match inner.store.write_bytes(dest, bytes).await {
                Ok(()) => Ok(true),
                Err(e) => {
                    multi.add_status(&inner.full_path(dest), e.statuscode());
                    Ok(false)
                },
            };
        }

        // Depth 0 onto an existing collection means "properties only",
        // which this gateway has no dead-property-free concept of; treat
        // it as "ensure the collection exists" and stop there.
        if let Err(e) = inner.store.create_collection(dest).await {
            multi.add_status(&inner.full_path(dest), e.statuscode());
            return Ok(false);
        }
        if depth == Depth::Zero {
            return Ok(true);
        }

        let children = match inner.store.list_items(source).await {
            Ok(c) => c,
            Err(e) => {
                multi.add_status(&inner.full_path(source), e.statuscode());
                return Ok(false);
            },
        };

        let mut all_ok = true;
        for child in children {
            let mut nsrc = inner.full_path(source);
            nsrc.push_segment(child.meta().name.as_bytes());
            nsrc.add_slash_if(child.is_collection());
            let mut ndest = inner.full_path(dest);
            ndest.push_segment(child.meta().name.as_bytes());
            ndest.add_slash_if(child.is_collection());
            if !copy_recursive(inner, &nsrc, &ndest, depth, multi).await? {
                all_ok = false;
            }
        }
        Ok(all_ok)
    })
}

/// Remove an existing destination (file or whole subtree) before a COPY or
/// MOVE overwrites it.
fn delete_destination<'a, B: Backend>(
    inner: &'a DavInner<B>,
    path: &'a DavPathRef,
    multi: &'a mut MultiError,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = DavResult<bool>> + Send + 'a>> {
    Box::pin(async move {
        let item = match inner.store.get_item(path).await {
            Ok(item) => item,
            Err(DavError::NotFound) => return Ok(true),
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
                if !delete_destination(inner, &child_path, multi).await? {
                    all_ok = false;
                }
            }
            if !all_ok {
                return Ok(false);
            }
        }
        match inner.store.delete_item(path).await {
            Ok(()) => {
                if let Some(locks) = &inner.locks {
                    locks.clear(path);
                }
                Ok(true)
            },
            Err(e) => {
                multi.add_status(&inner.full_path(path), e.statuscode());
                Ok(false)
            },
        }
    })
}

pub(crate) async fn handle_copymove<B: Backend>(
    inner: &DavInner<B>,
    req: &Request<()>,
    path: &DavPathRef,
    is_move: bool,
) -> DavResult<Response<Body>> {
    let overwrite = req.headers().typed_get::<Overwrite>().map(|o| o.0).unwrap_or(true);
    let depth = parse_depth(req, is_move)?;
    let dest = parse_destination(inner, req)?;

    let dest_parent = dest.parent();
    if inner.store.get_item(&dest_parent).await.is_err() {
        return Err(DavError::Conflict);
    }

    inner.store.get_item(path).await?;
    let dest_existing = match inner.store.get_item(&dest).await {
        Ok(item) => Some(item),
        Err(DavError::NotFound) => None,
        Err(e) => return Err(e),
    };
    let exists = dest_existing.is_some();

    if !overwrite && exists {
        return Err(DavError::PreconditionFailed);
    }
    if same_path(path, &dest) {
        return Err(DavError::Forbidden);
    }

    if is_move {
        inner.check_locked(path, true, req.headers())?;
    }
    inner.check_locked(&dest, true, req.headers())?;

    let mut multi = MultiError::new();

    // Depth 0 onto an already-existing collection means "properties only"
    // (RFC4918 §9.8.3); leave its contents alone rather than wiping it.
    let dest_is_dir = matches!(dest_existing, Some(StoreItem::Collection(_)));
    if overwrite && exists && !(depth == Depth::Zero && dest_is_dir) {
        if !delete_destination(inner, &dest, &mut multi).await? {
            return multi.into_response(&inner.full_path(path));
        }
    }

    let final_status = if exists { StatusCode::NO_CONTENT } else { StatusCode::CREATED };

    if is_move {
        match inner.store.move_item(path, &dest).await {
            Ok(()) => {
                if let Some(locks) = &inner.locks {
                    locks.clear(path);
                }
                multi.add_status(&inner.full_path(path), final_status);
            },
            Err(e) => {
                multi.add_status(&inner.full_path(path), e.statuscode());
            },
        }
    } else {
        let ok = copy_recursive(inner, path, &dest, depth, &mut multi).await?;
        if ok {
            multi.add_status(&inner.full_path(path), final_status);
        }
    }

    multi.into_response(&inner.full_path(path))
}
