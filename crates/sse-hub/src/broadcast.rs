//! Delivery of formatted messages to registered connections

use serde::Serialize;
use tracing::{debug, info};

use crate::codec;
use crate::fault;
use crate::registry::{probe_ended, ClientRegistry};
use crate::sink::{handle_key, SinkHandle};

impl ClientRegistry {
    /// Write one message to `handle`
    ///
    /// Ended handles are skipped. A failed write ends the handle and removes
    /// its record.
    pub fn send<T: Serialize + ?Sized>(&self, handle: &SinkHandle, payload: &T) {
        if probe_ended(handle) {
            return;
        }
        let frame = codec::format_message(payload);
        self.write_frame(handle, &frame);
    }

    /// Write one message to the connection registered as `id`
    ///
    /// Returns `true` when a write was attempted on a live handle. SSE has no
    /// delivery acknowledgement, so this is not a delivery receipt.
    pub fn send_to_id<T: Serialize + ?Sized>(&self, id: &str, payload: &T) -> bool {
        let Some(handle) = self.connections.get(id).map(|entry| entry.handle.clone()) else {
            debug!(connection_id = %id, "Send to unknown connection");
            return false;
        };
        if probe_ended(&handle) {
            self.evict(id, Some(&handle));
            return false;
        }
        self.send(&handle, payload);
        true
    }

    /// Write one message to every live connection
    ///
    /// The payload is formatted once. Connections that fail (or have already
    /// ended) are removed after the walk completes. Returns the number of
    /// successful writes.
    pub fn broadcast<T: Serialize + ?Sized>(&self, payload: &T) -> usize {
        let frame = codec::format_message(payload);
        let targets = self.snapshot();
        if targets.is_empty() {
            return 0;
        }

        let mut sent = 0;
        let mut failed = Vec::new();
        for (id, handle) in &targets {
            let delivered =
                !probe_ended(handle) && fault::best_effort("write", id, || handle.write(&frame));
            if delivered {
                sent += 1;
            } else {
                failed.push((id, handle));
            }
        }

        let removed = failed.len();
        for (id, handle) in failed {
            self.evict(id, Some(handle));
        }

        info!(
            sent_count = sent,
            removed,
            "Broadcast event to all connections"
        );
        sent
    }

    /// Write one final message to every connection, end them all, and empty
    /// the registry
    ///
    /// The registry is empty afterwards even if individual writes or ends
    /// fail. It also stays shut: handles registered later are ended instead
    /// of stored.
    pub fn broadcast_and_close_all<T: Serialize + ?Sized>(&self, payload: &T) {
        let frame = codec::format_message(payload);
        let targets = {
            let mut state = self.lock();
            state.closed = true;
            let targets = self.snapshot();
            self.connections.clear();
            self.handles.clear();
            targets
        };

        for (id, handle) in &targets {
            if !probe_ended(handle) {
                fault::best_effort("write", id, || handle.write(&frame));
            }
            if !probe_ended(handle) {
                fault::best_effort("end", id, || handle.end());
            }
        }

        info!(
            closed = targets.len(),
            "Broadcast final event and closed all connections"
        );
    }

    fn write_frame(&self, handle: &SinkHandle, frame: &str) -> bool {
        let id = self
            .handles
            .get(&handle_key(handle))
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        if fault::best_effort("write", &id, || handle.write(frame)) {
            return true;
        }
        fault::best_effort("end", &id, || handle.end());
        self.remove(handle);
        false
    }

    fn snapshot(&self) -> Vec<(String, SinkHandle)> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().handle.clone()))
            .collect()
    }
}

