//! 207 Multi-Status response builder (C6), SPEC_FULL.md §7: "Tree-operation
//! per-child failures are encapsulated as per-child `<response>` entries."
//!
//! Grounded on the reference server's `multierror.rs`, reimplemented without
//! its old `await!`/`futures03` channel plumbing: recursive tree operations
//! (DELETE, COPY, MOVE) here collect `(DavPath, StatusCode)` pairs into a
//! plain `Vec` as they walk, then hand the whole batch to [`multi_status`]
//! once finished, since the full set of affected paths is already known
//! in-process (no separate producer task to stream from).

use http::{Response, StatusCode};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavResult;
use crate::xmlutil::{self, ElementExt};

/// One path's outcome within a recursive tree operation.
pub struct MultiStatusEntry {
    pub path: DavPath,
    pub status: StatusCode,
}

/// Accumulates per-path outcomes during a recursive DELETE/COPY/MOVE walk.
#[derive(Default)]
pub struct MultiError {
    entries: Vec<MultiStatusEntry>,
}

impl MultiError {
    pub fn new() -> MultiError {
        MultiError { entries: Vec::new() }
    }

    pub fn add_status(&mut self, path: &DavPath, status: StatusCode) {
        self.entries.push(MultiStatusEntry { path: path.clone(), status });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the HTTP response: a bare status if the only entry is for
    /// `req_path` itself, a `207 Multi-Status` body otherwise.
    pub fn into_response(mut self, req_path: &DavPath) -> DavResult<Response<Body>> {
        if self.entries.len() == 1 && &self.entries[0].path == req_path {
            let status = self.entries[0].status;
            return Ok(Response::builder().status(status).body(Body::empty()).unwrap());
        }
        if self.entries.is_empty() {
            self.entries.push(MultiStatusEntry { path: req_path.clone(), status: StatusCode::OK });
        }
        multi_status(&self.entries)
    }
}

/// Build a `207 Multi-Status` body out of already-collected entries.
pub fn multi_status(entries: &[MultiStatusEntry]) -> DavResult<Response<Body>> {
    let mut buf = Vec::new();
    {
        let mut emitter = xmlutil::emitter(&mut buf)?;
        emitter.write(xml::writer::XmlEvent::start_element("D:multistatus").ns("D", "DAV:"))?;
        for entry in entries {
            emitter.write(xml::writer::XmlEvent::start_element("D:response"))?;
            let href = entry.path.as_url_string_with_prefix();
            xmltree::Element::new_text("D:href", href).write_ev(&mut emitter)?;
            let status_line = format!("HTTP/1.1 {}", entry.status);
            xmltree::Element::new_text("D:status", status_line).write_ev(&mut emitter)?;
            emitter.write(xml::writer::XmlEvent::end_element())?;
        }
        emitter.write(xml::writer::XmlEvent::end_element())?;
    }
    Ok(Response::builder()
        .header("content-type", "application/xml; charset=utf-8")
        .status(StatusCode::MULTI_STATUS)
        .body(Body::from(buf))
        .unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_success_collapses_to_bare_status() {
        let path = DavPath::new("/a.txt").unwrap();
        let mut me = MultiError::new();
        me.add_status(&path, StatusCode::NO_CONTENT);
        let resp = me.into_response(&path).unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn mixed_results_produce_multistatus() {
        let path = DavPath::new("/docs/").unwrap();
        let child = DavPath::new("/docs/a.txt").unwrap();
        let mut me = MultiError::new();
        me.add_status(&path, StatusCode::NO_CONTENT);
        me.add_status(&child, StatusCode::LOCKED);
        let resp = me.into_response(&path).unwrap();
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    }
}
