//! Consumer side of the event stream
//!
//! [`subscribe`] turns an SSE endpoint into a [`Stream`] of [`StreamEvent`]s.
//! Filtering and mapping are ordinary `futures::StreamExt` combinators:
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use sse_hub::client::{parse_payload, subscribe, StreamEvent};
//!
//! # async fn run() {
//! let client = reqwest::Client::new();
//! let mut ticks = Box::pin(subscribe(&client, "http://localhost:8080/time")
//!     .filter_map(|event| async move {
//!         match event {
//!             StreamEvent::Message(text) => parse_payload(&text).ok(),
//!             _ => None,
//!         }
//!     })
//!     .filter(|payload| futures::future::ready(!payload.contains_key("type"))));
//!
//! while let Some(tick) = ticks.next().await {
//!     println!("{}", tick["utc"]);
//! }
//! # }
//! ```

use futures::stream::{Stream, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{Error, PayloadError};

/// One observation from a subscribed stream
///
/// `Open` comes first, then any number of `Message`s, then exactly one of
/// `Error` or `Closed`.
#[derive(Debug)]
pub enum StreamEvent {
    /// The server accepted the subscription
    Open,
    /// Text of one `data:` frame
    Message(String),
    /// The subscription failed
    Error(Error),
    /// The server finished the stream
    Closed,
}

/// Decode a message's text as a JSON object
pub fn parse_payload(text: &str) -> Result<Map<String, Value>, PayloadError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(PayloadError::NotAnObject {
            raw: text.to_owned(),
        }),
        Err(source) => Err(PayloadError::InvalidJson {
            raw: text.to_owned(),
            source,
        }),
    }
}

/// Incremental decoder for the `data:` framing
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning the text of every frame they complete
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = text.strip_suffix('\r').unwrap_or(&*text);

            if line.is_empty() {
                if !self.data.is_empty() {
                    frames.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                self.data.push(value.to_owned());
            }
            // comments (":") and other fields carry nothing for us
        }
        frames
    }
}

/// Subscribe to an SSE endpoint
///
/// The request runs on a spawned task, so this must be called within a tokio
/// runtime.
pub fn subscribe(
    client: &reqwest::Client,
    url: impl reqwest::IntoUrl,
) -> impl Stream<Item = StreamEvent> {
    let (tx, rx) = mpsc::channel(64);
    let request = client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send();

    tokio::spawn(async move {
        let terminal = match request.await {
            Ok(response) if response.status().is_success() => {
                if tx.send(StreamEvent::Open).await.is_err() {
                    return;
                }
                pump(response, &tx).await
            }
            Ok(response) => StreamEvent::Error(Error::Status(response.status().as_u16())),
            Err(e) => StreamEvent::Error(Error::Http(e)),
        };
        let _ = tx.send(terminal).await;
    });

    ReceiverStream::new(rx)
}

async fn pump(response: reqwest::Response, tx: &mpsc::Sender<StreamEvent>) -> StreamEvent {
    let mut decoder = FrameDecoder::new();
    let mut body = Box::pin(response.bytes_stream());

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return StreamEvent::Error(Error::Http(e)),
        };
        for frame in decoder.push(&chunk) {
            if tx.send(StreamEvent::Message(frame)).await.is_err() {
                // subscriber went away; nobody to report to
                return StreamEvent::Closed;
            }
        }
    }
    StreamEvent::Closed
}
