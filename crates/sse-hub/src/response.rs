//! axum response for an open event stream
//!
//! Frames reach the body already in wire form, so they are streamed as raw
//! bytes instead of being rebuilt as `axum::response::sse::Event`s.

use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use crate::sink::{ChannelSink, SinkHandle};

/// Open a new event stream
///
/// Frames written to the returned handle become the body of the returned
/// response. The response carries the event-stream headers; axum sends them as
/// soon as the handler returns.
pub fn open_event_stream(capacity: usize) -> (SinkHandle, EventStream) {
    let (sink, receiver) = ChannelSink::new(capacity);
    let handle: SinkHandle = Arc::new(sink);
    let stream = EventStream {
        receiver,
        on_disconnect: None,
    };
    (handle, stream)
}

/// Receiving side of an event stream, convertible into a response
pub struct EventStream {
    receiver: mpsc::Receiver<String>,
    on_disconnect: Option<Box<dyn FnOnce() + Send>>,
}

impl EventStream {
    /// Run `f` once when the response body is dropped, whether the peer
    /// disconnected or the stream was ended
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_disconnect = Some(Box::new(f));
        self
    }
}

impl IntoResponse for EventStream {
    fn into_response(self) -> Response {
        let frames = ReceiverStream::new(self.receiver).map(Ok::<_, Infallible>);
        let body = CleanupStream {
            inner: Box::pin(frames),
            cleanup: self.on_disconnect,
        };

        let mut response = Response::new(Body::from_stream(body));
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        response
    }
}

type FrameStream = Pin<Box<dyn Stream<Item = Result<String, Infallible>> + Send>>;

struct CleanupStream {
    inner: FrameStream,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for CleanupStream {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl Stream for CleanupStream {
    type Item = Result<String, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
