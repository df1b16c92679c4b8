//! PUT/PATCH (C6), SPEC_FULL.md §4.6. Grounded on the reference server's
//! `handle_put.rs`: lock/precondition checks before touching the store,
//! then either the small-file fast path (`Store::write_bytes`) or the
//! chunked-upload state machine (`upload.rs`) depending on body size.
//! SabreDAV's `X-Update-Range` (PATCH) and Apache's `Content-Range` (PUT)
//! partial-update conventions are both honored, read-modify-write against
//! whatever bytes are already stored.

use std::sync::Arc;

use http::{Request, Response, StatusCode};

use crate::backend::{Backend, BackendUploadExt};
use crate::body::Body;
use crate::conditional::check_etag_preconditions;
use crate::davpath::DavPathRef;
use crate::errors::{DavError, DavResult};
use crate::handler::DavInner;
use crate::property::rfc1123;
use crate::store::backenderror_to_daverror;
use crate::upload::CHUNK_SIZE;

/// A parsed partial-update range, covering both SabreDAV's `X-Update-Range`
/// (used with `PATCH`) and the plain start offset Apache's `Content-Range`
/// convention implies (used with `PUT`).
enum UpdateRange {
    FromTo(u64, u64),
    AllFrom(u64),
    Last(u64),
    Append,
}

fn parse_update_range(value: &str) -> Option<UpdateRange> {
    if value.eq_ignore_ascii_case("append") {
        return Some(UpdateRange::Append);
    }
    let spec = value.strip_prefix("bytes=")?;
    let (from, to) = spec.split_once('-')?;
    if from.is_empty() {
        return Some(UpdateRange::Last(to.parse().ok()?));
    }
    let start: u64 = from.parse().ok()?;
    if to.is_empty() {
        Some(UpdateRange::AllFrom(start))
    } else {
        Some(UpdateRange::FromTo(start, to.parse().ok()?))
    }
}

/// Apache's `Content-Range: bytes start-end/total` on a plain `PUT`.
fn parse_content_range(value: &str) -> Option<u64> {
    let spec = value.strip_prefix("bytes ")?;
    let (range, _total) = spec.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    start.parse().ok()
}

fn splice(existing: Vec<u8>, start: u64, new_data: &[u8]) -> Vec<u8> {
    let mut buf = existing;
    let start = start as usize;
    let end = start + new_data.len();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[start..end].copy_from_slice(new_data);
    buf
}

pub(crate) async fn handle_put<B: Backend>(
    inner: &DavInner<B>,
    req: &Request<()>,
    path: &DavPathRef,
    is_patch: bool,
    body: Vec<u8>,
) -> DavResult<Response<Body>> {
    if is_patch {
        let ct = req.headers().get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
        if ct != "application/x-sabredav-partialupdate" {
            return Err(DavError::UnsupportedMediaType);
        }
    }

    let existing = match inner.store.get_item(path).await {
        Ok(item) => Some(item),
        Err(DavError::NotFound) => None,
        Err(e) => return Err(e),
    };
    let existed = existing.is_some();
    let current_etag = existing.as_ref().map(|item| item.meta().etag.clone());

    if let Some(status) = check_etag_preconditions(req.headers(), current_etag.as_deref()) {
        return Err(DavError::Status(status));
    }
    inner.check_locked(path, false, req.headers())?;

    let update_range = if is_patch {
        let hdr = req
            .headers()
            .get("x-update-range")
            .and_then(|v| v.to_str().ok())
            .ok_or(DavError::BadRequest)?;
        Some(parse_update_range(hdr).ok_or(DavError::BadRequest)?)
    } else if let Some(cr) = req.headers().get(http::header::CONTENT_RANGE).and_then(|v| v.to_str().ok()) {
        Some(UpdateRange::AllFrom(parse_content_range(cr).ok_or(DavError::BadRequest)?))
    } else {
        None
    };

    let final_bytes = match update_range {
        None => body,
        Some(range) => {
            let current = if existed { inner.store.read_bytes(path).await? } else { Vec::new() };
            let start = match range {
                UpdateRange::FromTo(s, _) => s,
                UpdateRange::AllFrom(s) => s,
                UpdateRange::Last(n) => current.len().saturating_sub(n as usize) as u64,
                UpdateRange::Append => current.len() as u64,
            };
            splice(current, start, &body)
        },
    };

    if final_bytes.len() as u64 <= CHUNK_SIZE {
        inner.store.write_bytes(path, final_bytes).await?;
    } else {
        run_chunked_upload(inner, path, final_bytes).await?;
    }

    let written = inner.store.get_item(path).await?;
    let wmeta = written.meta();

    let status = if existed { StatusCode::NO_CONTENT } else { StatusCode::CREATED };
    let mut builder = Response::builder()
        .status(status)
        .header("etag", format!("\"{}\"", wmeta.etag))
        .header("last-modified", rfc1123(wmeta.modified));
    if !existed {
        builder = builder.header("content-length", "0");
    }
    Ok(builder.body(Body::empty()).unwrap())
}

/// Drives a chunked upload for `path`, resuming a previously parked failed
/// session for the same path and size instead of restarting from part 1
/// (SPEC_FULL.md §4.5, scenario S3: a second `PUT` after an interruption
/// renews credentials via `ConfirmKeyInit` and finishes the remaining
/// parts).
async fn run_chunked_upload<B: Backend>(inner: &DavInner<B>, path: &DavPathRef, data: Vec<u8>) -> DavResult<()> {
    let backend = inner.store.backend();
    let key = path.as_url_string();
    let size = data.len() as u64;

    let parked = inner.parked_session(&key);
    let resumable = match &parked {
        Some(session) => session.size == size && session.failed().await,
        None => false,
    };
    let session = if resumable {
        let session = parked.unwrap();
        session.prepare_resume(backend).await?;
        session
    } else {
        Arc::new(backend.begin_session(path, size, CHUNK_SIZE).await.map_err(backenderror_to_daverror)?)
    };

    inner.park_session(key.clone(), session.clone());
    let result: DavResult<()> = session.run(inner.store.backend_arc(), Arc::new(data), inner.upload_workers).await;
    match &result {
        Ok(()) => inner.forget_session(&key),
        Err(_) => { /* stays parked in `Error` state for a future resume */ },
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_append_token() {
        assert!(matches!(parse_update_range("append"), Some(UpdateRange::Append)));
    }

    #[test]
    fn parses_fromto_update_range() {
        assert!(matches!(parse_update_range("bytes=10-20"), Some(UpdateRange::FromTo(10, 20))));
    }

    #[test]
    fn parses_content_range_start() {
        assert_eq!(parse_content_range("bytes 100-199/500"), Some(100));
    }

    #[test]
    fn splice_extends_short_buffer() {
        let out = splice(vec![1, 2], 4, &[9, 9]);
        assert_eq!(out, vec![1, 2, 0, 0, 9, 9]);
    }
}
