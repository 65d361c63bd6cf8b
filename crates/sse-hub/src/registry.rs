//! Client registry for live SSE connections

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionMetadata, ConnectionRecord};
use crate::fault;
use crate::sink::{handle_key, CloseListener, SinkHandle};

/// Default age after which [`ClientRegistry::prune_stale`] evicts a connection
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Generate an id for a caller that did not supply one
pub fn generate_anonymous_id() -> String {
    format!(
        "anon-{}-{}",
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

/// State guarded by the registry's write lock
#[derive(Debug, Default)]
pub(crate) struct Mutation {
    /// Set once by `broadcast_and_close_all`; later registrations are ended
    pub(crate) closed: bool,
}

/// Registry of live connections, keyed by id
///
/// Cloning is cheap and every clone shares the same state. Reads go straight
/// to the maps; every change that touches both maps holds the write lock, and
/// no handle is called while it is held.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    /// All live connections: id -> record
    pub(crate) connections: Arc<DashMap<String, ConnectionRecord>>,
    /// Reverse index: handle identity -> id. Entries never outlive the record.
    pub(crate) handles: Arc<DashMap<usize, String>>,
    pub(crate) mutation: Arc<Mutex<Mutation>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the id it is stored under
    ///
    /// A handle that is already registered under another id is moved to the
    /// new id. A different handle already stored under `id` is replaced
    /// without being ended. Once the registry has been shut down with
    /// [`broadcast_and_close_all`](Self::broadcast_and_close_all), the handle
    /// is ended instead of stored.
    pub fn register(
        &self,
        id: Option<String>,
        handle: SinkHandle,
        metadata: ConnectionMetadata,
    ) -> String {
        let id = id.unwrap_or_else(generate_anonymous_id);
        let key = handle_key(&handle);

        let state = self.lock();
        if state.closed {
            drop(state);
            warn!(connection_id = %id, "Registry is shut down, ending new connection");
            if !probe_ended(&handle) {
                fault::best_effort("end", &id, || handle.end());
            }
            return id;
        }

        let previous_id = self.handles.get(&key).map(|entry| entry.value().clone());
        let already_watched = previous_id.is_some();
        let superseded = previous_id.filter(|previous| previous != &id);
        if let Some(previous_id) = &superseded {
            self.connections
                .remove_if(previous_id, |_, record| Arc::ptr_eq(&record.handle, &handle));
        }

        let record = ConnectionRecord::new(id.clone(), handle.clone(), metadata);
        let replaced = self
            .connections
            .insert(id.clone(), record)
            .filter(|replaced| !Arc::ptr_eq(&replaced.handle, &handle));
        if let Some(replaced) = &replaced {
            self.handles
                .remove_if(&handle_key(&replaced.handle), |_, owner| owner == &id);
        }
        self.handles.insert(key, id.clone());
        let total_connections = self.connections.len();
        drop(state);

        if let Some(previous_id) = superseded {
            debug!(
                connection_id = %id,
                superseded_id = %previous_id,
                "Handle re-registered under a new id"
            );
        }
        if replaced.is_some() {
            warn!(
                connection_id = %id,
                "Replaced a different connection registered under the same id"
            );
        }

        if !already_watched {
            self.watch_close(&id, &handle);
        }

        info!(connection_id = %id, total_connections, "SSE connection registered");
        id
    }

    /// Remove whatever record currently owns `handle`
    pub fn remove(&self, handle: &SinkHandle) {
        let removed = {
            let _state = self.lock();
            let id = self
                .handles
                .get(&handle_key(handle))
                .map(|entry| entry.value().clone());
            id.and_then(|id| self.unlink(&id, Some(handle)))
        };
        if let Some(record) = removed {
            self.finish(record);
        }
    }

    /// Remove a record by id, ending its stream. Returns `false` if absent.
    pub fn remove_by_id(&self, id: &str) -> bool {
        self.evict(id, None)
    }

    /// Number of live records
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Look up a record by id
    pub fn get(&self, id: &str) -> Option<ConnectionRecord> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of all live records
    pub fn list(&self) -> Vec<ConnectionRecord> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Evict records whose stream has ended or that are older than `max_age`
    ///
    /// A record whose handle panics when inspected is evicted as corrupt.
    /// Returns the number of records removed.
    pub fn prune_stale(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let stale: Vec<(String, SinkHandle)> = self
            .connections
            .iter()
            .filter(|entry| {
                let record = entry.value();
                probe_ended(&record.handle) || record.age(now) > max_age
            })
            .map(|entry| (entry.key().clone(), entry.value().handle.clone()))
            .collect();

        let pruned = stale
            .iter()
            .filter(|(id, handle)| self.evict(id, Some(handle)))
            .count();

        if pruned > 0 {
            info!(
                pruned,
                remaining_connections = self.connections.len(),
                "Pruned stale connections"
            );
        }
        pruned
    }

    /// Remove `id` if present (and, when `expected` is given, only while it
    /// still holds that handle), then end its stream.
    pub(crate) fn evict(&self, id: &str, expected: Option<&SinkHandle>) -> bool {
        let removed = {
            let _state = self.lock();
            self.unlink(id, expected)
        };
        match removed {
            Some(record) => {
                self.finish(record);
                true
            }
            None => false,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Mutation> {
        self.mutation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the forward entry and its reverse entry together. Caller holds
    /// the write lock.
    fn unlink(&self, id: &str, expected: Option<&SinkHandle>) -> Option<ConnectionRecord> {
        let removed = match expected {
            Some(handle) => self
                .connections
                .remove_if(id, |_, record| Arc::ptr_eq(&record.handle, handle)),
            None => self.connections.remove(id),
        };
        let (_, record) = removed?;
        self.handles
            .remove_if(&handle_key(&record.handle), |_, owner| owner == id);
        Some(record)
    }

    /// End an unlinked record's stream unless it already ended
    fn finish(&self, record: ConnectionRecord) {
        if !probe_ended(&record.handle) {
            fault::best_effort("end", &record.id, || record.handle.end());
        }
        info!(
            connection_id = %record.id,
            remaining_connections = self.connections.len(),
            "SSE connection removed"
        );
    }

    fn watch_close(&self, id: &str, handle: &SinkHandle) {
        let registry = self.clone();
        let weak = Arc::downgrade(handle);
        let listener: CloseListener = Box::new(move || {
            if let Some(handle) = weak.upgrade() {
                registry.remove(&handle);
            }
        });
        if !fault::best_effort("attach close listener", id, || handle.on_close(listener)) {
            debug!(
                connection_id = %id,
                "Close detection unavailable, relying on removal or pruning"
            );
        }
    }
}

/// Whether a handle has ended; a handle that panics when asked counts as ended
pub(crate) fn probe_ended(handle: &SinkHandle) -> bool {
    fault::probe(|| handle.is_ended()).unwrap_or(true)
}
