//! Transport handles that SSE frames are written to

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SinkError;

/// Callback fired once when a handle's underlying stream closes
pub type CloseListener = Box<dyn FnOnce() + Send + 'static>;

/// Shared reference to a transport handle
pub type SinkHandle = Arc<dyn SseSink>;

/// A writable, long-lived SSE stream
///
/// Implementations must not call back into the registry that owns them from
/// `write`, `end` or `is_ended`.
pub trait SseSink: Send + Sync + 'static {
    /// Queue one fully formatted frame
    fn write(&self, frame: &str) -> Result<(), SinkError>;

    /// Terminate the stream. Ending twice is not an error.
    fn end(&self) -> Result<(), SinkError>;

    /// Whether the stream can no longer accept frames
    fn is_ended(&self) -> bool;

    /// Run `listener` once when the stream closes
    ///
    /// Handles that cannot observe closure keep this default.
    fn on_close(&self, listener: CloseListener) -> Result<(), SinkError> {
        drop(listener);
        Err(SinkError::ListenerUnsupported)
    }
}

/// Address of the value behind a handle, used as a non-owning identity key.
pub(crate) fn handle_key(handle: &SinkHandle) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

/// Sink backed by a bounded channel of pre-formatted frames
///
/// The receiving half becomes the HTTP response body. Dropping the receiver
/// (peer disconnect) closes the sink; calling [`SseSink::end`] drops the
/// sending half so the body drains what is queued and then finishes.
#[derive(Debug)]
pub struct ChannelSink {
    sender: Mutex<Option<mpsc::Sender<String>>>,
    ended: CancellationToken,
}

impl ChannelSink {
    /// Create a sink and the receiver its frames arrive on
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let sink = Self {
            sender: Mutex::new(Some(sender)),
            ended: CancellationToken::new(),
        };
        (sink, receiver)
    }

    fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SseSink for ChannelSink {
    fn write(&self, frame: &str) -> Result<(), SinkError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(SinkError::Ended)?;
        sender.try_send(frame.to_owned()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn end(&self) -> Result<(), SinkError> {
        self.ended.cancel();
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn is_ended(&self) -> bool {
        if self.ended.is_cancelled() {
            return true;
        }
        match self.sender() {
            Some(sender) => sender.is_closed(),
            None => true,
        }
    }

    fn on_close(&self, listener: CloseListener) -> Result<(), SinkError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SinkError::ListenerUnsupported)?;
        let sender = self.sender().ok_or(SinkError::Ended)?;
        let ended = self.ended.clone();

        runtime.spawn(async move {
            tokio::select! {
                _ = sender.closed() => {}
                _ = ended.cancelled() => {}
            }
            // Release our sender so an ended stream can drain and finish.
            drop(sender);
            listener();
        });
        Ok(())
    }
}
