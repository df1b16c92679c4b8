//! RFC 7232 conditional-request evaluation plus the DAV `If:` lock-token
//! subset (C1), used by the mutating method handlers to validate
//! `If-Match`/`If-None-Match` and lock-token preconditions before touching
//! the store.

use headers::HeaderMapExt;
use http::{HeaderMap, StatusCode};

use crate::davheaders::{ETag, ETagList, IfMatch, IfNoneMatch};

/// Evaluate `If-Match`/`If-None-Match` against a resource's current etag
/// (`None` if the resource does not exist). Returns `Some(status)` if the
/// request should be rejected.
pub fn check_etag_preconditions(headers: &HeaderMap, etag: Option<&str>) -> Option<StatusCode> {
    if let Some(IfMatch(list)) = headers.typed_get::<IfMatch>() {
        let ok = match (&list, etag) {
            (ETagList::Star, Some(_)) => true,
            (ETagList::Star, None) => false,
            (ETagList::Tags(_), Some(cur)) => list.matches(&ETag::strong(cur)),
            (ETagList::Tags(_), None) => false,
        };
        if !ok {
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    }
    if let Some(IfNoneMatch(list)) = headers.typed_get::<IfNoneMatch>() {
        let rejected = match (&list, etag) {
            (ETagList::Star, Some(_)) => true,
            (ETagList::Star, None) => false,
            (ETagList::Tags(_), Some(cur)) => list.matches(&ETag::strong(cur)),
            (ETagList::Tags(_), None) => false,
        };
        if rejected {
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    }
    None
}

/// Extract the lock tokens offered by the client's `If:` header, if any.
pub fn if_tokens(headers: &HeaderMap) -> Vec<String> {
    headers.typed_get::<crate::davheaders::If>().map(|h| h.0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_match_star_requires_existing_resource() {
        let mut headers = HeaderMap::new();
        headers.insert("if-match", "*".parse().unwrap());
        assert_eq!(check_etag_preconditions(&headers, None), Some(StatusCode::PRECONDITION_FAILED));
        assert_eq!(check_etag_preconditions(&headers, Some("abc")), None);
    }

    #[test]
    fn if_none_match_star_rejects_existing_resource() {
        let mut headers = HeaderMap::new();
        headers.insert("if-none-match", "*".parse().unwrap());
        assert_eq!(check_etag_preconditions(&headers, Some("abc")), Some(StatusCode::PRECONDITION_FAILED));
        assert_eq!(check_etag_preconditions(&headers, None), None);
    }

    #[test]
    fn if_match_specific_tag_must_equal_current() {
        let mut headers = HeaderMap::new();
        headers.insert("if-match", "\"abc\"".parse().unwrap());
        assert_eq!(check_etag_preconditions(&headers, Some("abc")), None);
        assert_eq!(
            check_etag_preconditions(&headers, Some("xyz")),
            Some(StatusCode::PRECONDITION_FAILED)
        );
    }
}
