//! Definitions for the request and response bodies.
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::stream::{Stream, StreamExt};
use http_body::{Frame, SizeHint};
use http_body_util::BodyStream;

use crate::backend::DataStream;

/// The response body produced by the handler. Implements both
/// `futures_util::Stream` and `http_body::Body` so it plugs into any
/// HTTP/1.1 front-end.
pub struct Body {
    inner: BodyKind,
}

enum BodyKind {
    Empty,
    Bytes(Option<Bytes>),
    Stream(DataStream),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Body {
        Body {
            inner: BodyKind::Empty,
        }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().inner {
            BodyKind::Empty => Poll::Ready(None),
            BodyKind::Bytes(b) => Poll::Ready(b.take().map(Ok)),
            BodyKind::Stream(s) => s.poll_next_unpin(cx),
        }
    }
}

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.poll_next(cx).map_ok(Frame::data)
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            BodyKind::Empty => true,
            BodyKind::Bytes(b) => b.is_none(),
            BodyKind::Stream(_) => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            BodyKind::Empty => SizeHint::with_exact(0),
            BodyKind::Bytes(Some(b)) => SizeHint::with_exact(b.len() as u64),
            BodyKind::Bytes(None) => SizeHint::with_exact(0),
            BodyKind::Stream(_) => SizeHint::default(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Body {
        Body {
            inner: BodyKind::Bytes(Some(b)),
        }
    }
}

impl From<String> for Body {
    fn from(s: String) -> Body {
        Body::from(Bytes::from(s))
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Body {
        Body::from(Bytes::from(s.to_string()))
    }
}

impl From<DataStream> for Body {
    fn from(s: DataStream) -> Body {
        Body {
            inner: BodyKind::Stream(s),
        }
    }
}

/// Turn any incoming `http_body::Body` into the chunk stream the
/// backend contract consumes. Non-data frames are dropped, errors are
/// flattened into `io::Error`.
pub(crate) fn into_data_stream<B>(body: B) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    B: http_body::Body + Send + 'static,
    B::Data: Buf + Send,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    BodyStream::new(body).filter_map(|res| async move {
        match res {
            Ok(frame) => match frame.into_data() {
                Ok(mut data) => {
                    let len = data.remaining();
                    Some(Ok(data.copy_to_bytes(len)))
                }
                Err(_) => None,
            },
            Err(e) => Some(Err(io::Error::new(io::ErrorKind::UnexpectedEof, e))),
        }
    })
}
