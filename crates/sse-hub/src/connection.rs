//! Connection records kept by the registry

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sink::SinkHandle;

/// Descriptive data attached to a connection
///
/// Always the same three fields; unknown fields are dropped when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionMetadata {
    /// Client IP address (if available)
    pub ip: Option<String>,
    /// Application user id (if known)
    pub user_id: Option<String>,
    /// User agent (if available)
    pub user_agent: Option<String>,
}

/// One registered SSE stream
#[derive(Clone)]
pub struct ConnectionRecord {
    /// Identifier, unique among live records
    pub id: String,
    /// The stream frames are written to
    pub handle: SinkHandle,
    /// Connection metadata
    pub metadata: ConnectionMetadata,
    /// When the connection was registered
    pub created_at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub(crate) fn new(id: String, handle: SinkHandle, metadata: ConnectionMetadata) -> Self {
        Self {
            id,
            handle,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Time since registration; zero if the clock went backwards
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or_default()
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
