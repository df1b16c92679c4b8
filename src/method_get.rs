//! GET/HEAD (C6), SPEC_FULL.md §4.6. Grounded on the reference server's
//! `handle_gethead.rs` for the range/etag/last-modified logic, minus its
//! directory-listing branch — here a collection never has a body, so GET on
//! one is a flat `Forbidden` rather than a generated index page.

use http::{Request, Response, StatusCode};

use crate::backend::Backend;
use crate::body::Body;
use crate::conditional::check_etag_preconditions;
use crate::davpath::DavPathRef;
use crate::errors::{DavError, DavResult};
use crate::handler::DavInner;
use crate::property::rfc1123;

pub(crate) async fn handle_gethead<B: Backend>(
    inner: &DavInner<B>,
    req: &Request<()>,
    path: &DavPathRef,
    is_head: bool,
) -> DavResult<Response<Body>> {
    let item = inner.store.get_item(path).await?;
    if item.is_collection() {
        return Err(DavError::Forbidden);
    }
    let meta = item.meta();

    if let Some(status) = check_etag_preconditions(req.headers(), Some(&meta.etag)) {
        return Err(DavError::Status(status));
    }

    let full_len = meta.len;
    let data = if is_head { Vec::new() } else { inner.store.read_bytes(path).await? };

    let mut builder = Response::builder()
        .header("content-type", path.get_mime_type_str())
        .header("etag", format!("\"{}\"", meta.etag))
        .header("last-modified", rfc1123(meta.modified))
        .header("accept-ranges", "bytes");

    if let Some(range_hdr) = req.headers().get(http::header::RANGE).and_then(|v| v.to_str().ok()) {
        return Ok(match parse_range(range_hdr, full_len) {
            Some((start, end)) => {
                let slice = if is_head { Vec::new() } else { data[start as usize..=end as usize].to_vec() };
                builder
                    .header("content-range", format!("bytes {}-{}/{}", start, end, full_len))
                    .header("content-length", (end - start + 1).to_string())
                    .status(StatusCode::PARTIAL_CONTENT)
                    .body(Body::from(slice))
                    .unwrap()
            },
            None => Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header("content-range", format!("bytes */{}", full_len))
                .body(Body::empty())
                .unwrap(),
        });
    }

    builder = builder.header("content-length", full_len.to_string());
    Ok(builder.body(Body::from(data)).unwrap())
}

/// Parse a single `bytes=a-b` / `bytes=a-` / `bytes=-n` range (SPEC_FULL.md
/// §4.6: only one range is supported). Returns the inclusive `(start, end)`
/// byte offsets, or `None` if malformed or unsatisfiable (caller emits
/// `416`).
fn parse_range(header: &str, len: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') || len == 0 {
        return None;
    }
    let (from, to) = spec.split_once('-')?;
    let (start, end) = if from.is_empty() {
        let n: u64 = to.parse().ok()?;
        if n == 0 {
            return None;
        }
        let n = n.min(len);
        (len - n, len - 1)
    } else {
        let start: u64 = from.parse().ok()?;
        let end = if to.is_empty() { len - 1 } else { to.parse().ok()? };
        (start, end.min(len - 1))
    };
    if start > end || start >= len { None } else { Some((start, end)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fromto_range() {
        assert_eq!(parse_range("bytes=0-99", 1000), Some((0, 99)));
    }

    #[test]
    fn parses_suffix_range() {
        assert_eq!(parse_range("bytes=-10", 100), Some((90, 99)));
    }

    #[test]
    fn parses_open_ended_range() {
        assert_eq!(parse_range("bytes=50-", 100), Some((50, 99)));
    }

    #[test]
    fn rejects_out_of_bounds_range() {
        assert_eq!(parse_range("bytes=200-300", 100), None);
    }

    #[test]
    fn rejects_multi_range() {
        assert_eq!(parse_range("bytes=0-10,20-30", 100), None);
    }
}
