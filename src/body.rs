//! Request and response body plumbing (C1).
//!
//! Grounded on the reference server's `body.rs` in shape only — that file
//! predates `http-body` 1.0's `Frame`-based `Body::poll_frame`, so this is a
//! fresh implementation of the same `Body`/`StreamBody` split against the
//! version actually pinned in `Cargo.toml`, not a port of the old
//! `poll_data`/`poll_trailers` methods.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::stream::Stream;
use http_body::{Body as HttpBody, Frame, SizeHint};

use crate::async_stream::AsyncStream;

/// Returned by the dav handler; implements both `Stream` and
/// `http_body::Body`.
pub struct Body {
    pub(crate) inner: BodyType,
}

pub(crate) enum BodyType {
    Bytes(Option<Bytes>),
    AsyncStream(AsyncStream<Bytes, io::Error>),
    Empty,
}

impl Body {
    /// Return an empty body.
    pub fn empty() -> Body {
        Body { inner: BodyType::Empty }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match self.inner {
            BodyType::Bytes(ref mut strm) => Poll::Ready(strm.take().map(Ok)),
            BodyType::AsyncStream(ref mut strm) => Pin::new(strm).poll_next(cx),
            BodyType::Empty => Poll::Ready(None),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.poll_next(cx).map(|opt| opt.map(|res| res.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.inner, BodyType::Empty)
            || matches!(self.inner, BodyType::Bytes(None))
    }

    fn size_hint(&self) -> SizeHint {
        match self.inner {
            BodyType::Bytes(Some(ref b)) => SizeHint::with_exact(b.len() as u64),
            BodyType::Empty => SizeHint::with_exact(0),
            _ => SizeHint::default(),
        }
    }
}

impl From<String> for Body {
    fn from(t: String) -> Body {
        Body { inner: BodyType::Bytes(Some(Bytes::from(t))) }
    }
}

impl From<&str> for Body {
    fn from(t: &str) -> Body {
        Body { inner: BodyType::Bytes(Some(Bytes::from(t.to_string()))) }
    }
}

impl From<Bytes> for Body {
    fn from(t: Bytes) -> Body {
        Body { inner: BodyType::Bytes(Some(t)) }
    }
}

impl From<Vec<u8>> for Body {
    fn from(t: Vec<u8>) -> Body {
        Body { inner: BodyType::Bytes(Some(Bytes::from(t))) }
    }
}

impl From<AsyncStream<Bytes, io::Error>> for Body {
    fn from(s: AsyncStream<Bytes, io::Error>) -> Body {
        Body { inner: BodyType::AsyncStream(s) }
    }
}

use pin_project_lite::pin_project;

pin_project! {
    /// Wraps an arbitrary byte `Stream` (the incoming request body, coming
    /// from hyper) so it can be driven like any other `http_body::Body`.
    pub(crate) struct StreamBody<B> {
        #[pin]
        body: B,
    }
}

impl<ReqBody, ReqData, ReqError> HttpBody for StreamBody<ReqBody>
where
    ReqData: Buf + Send,
    ReqError: std::error::Error + Send + Sync + 'static,
    ReqBody: Stream<Item = Result<ReqData, ReqError>>,
{
    type Data = ReqData;
    type Error = ReqError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        this.body.poll_next(cx).map(|opt| opt.map(|res| res.map(Frame::data)))
    }
}

impl<ReqBody, ReqData, ReqError> StreamBody<ReqBody>
where
    ReqData: Buf + Send,
    ReqError: std::error::Error + Send + Sync + 'static,
    ReqBody: Stream<Item = Result<ReqData, ReqError>>,
{
    pub fn new(body: ReqBody) -> StreamBody<ReqBody> {
        StreamBody { body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_reports_zero_size_hint() {
        let b = Body::empty();
        assert_eq!(b.size_hint().exact(), Some(0));
    }
}
