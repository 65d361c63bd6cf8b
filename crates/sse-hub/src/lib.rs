//! # SSE Hub
//!
//! A registry of long-lived Server-Sent Events streams with fan-out broadcast.
//!
//! ## Features
//!
//! - **Fixed wire format**: every message is `data: <json>\n\n`, with a fallback
//!   payload when encoding fails
//! - **Client Registry**: caller-supplied or generated ids, reverse lookup by handle,
//!   automatic removal when the peer disconnects
//! - **Fault isolation**: one failing connection never aborts delivery to the others
//! - **Stale pruning**: evict ended or over-age connections on demand or on a timer
//! - **Shutdown primitive**: broadcast a final message and close every stream
//! - **axum integration** (`server` feature) and a **reqwest consumer** (`client` feature)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use axum::{extract::State, response::IntoResponse};
//! use sse_hub::{open_event_stream, ClientRegistry, ConnectionMetadata};
//!
//! async fn events(State(registry): State<ClientRegistry>) -> impl IntoResponse {
//!     let (handle, stream) = open_event_stream(64);
//!     registry.register(None, handle.clone(), ConnectionMetadata::default());
//!     registry.send(&handle, &serde_json::json!({"hello": "world"}));
//!
//!     let registry = registry.clone();
//!     stream.on_disconnect(move || registry.remove(&handle))
//! }
//! ```

mod broadcast;
pub mod codec;
mod connection;
mod error;
mod fault;
mod registry;
mod sink;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "server")]
mod response;

// Re-exports
pub use codec::{format_message, serialize, FALLBACK_PAYLOAD};
pub use connection::{ConnectionMetadata, ConnectionRecord};
pub use error::SinkError;
pub use registry::{generate_anonymous_id, ClientRegistry, DEFAULT_MAX_AGE};
pub use sink::{ChannelSink, CloseListener, SinkHandle, SseSink};

#[cfg(feature = "client")]
pub use error::{Error, PayloadError};
#[cfg(feature = "server")]
pub use response::{open_event_stream, EventStream};
