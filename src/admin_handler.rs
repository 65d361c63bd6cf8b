use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sse_hub::ConnectionMetadata;
use std::time::Duration;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Registry id to send to (if empty, broadcast to all)
    pub client_id: Option<String>,
    /// Payload (JSON)
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub sent_count: usize,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PruneRequest {
    /// Overrides the configured maximum connection age
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PruneResponse {
    pub pruned: usize,
    pub remaining: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub instance_id: String,
    pub total_connections: usize,
    pub connections: Vec<ConnectionInfo>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub metadata: ConnectionMetadata,
    pub connected_at: String,
    pub age_secs: u64,
}

/// POST /api/send - send to one connection or broadcast
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
    let sent_count = match &req.client_id {
        Some(client_id) if !client_id.is_empty() => {
            usize::from(state.registry.send_to_id(client_id, &req.data))
        }
        _ => state.registry.broadcast(&req.data),
    };

    let response = SendMessageResponse {
        success: sent_count > 0,
        sent_count,
        message: format!("Message sent to {} connection(s)", sent_count),
    };

    (StatusCode::OK, Json(response))
}

/// POST /api/prune - evict ended or over-age connections now
pub async fn prune(
    State(state): State<AppState>,
    Json(req): Json<PruneRequest>,
) -> impl IntoResponse {
    let max_age = req
        .max_age_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.config.registry.max_age());

    let pruned = state.registry.prune_stale(max_age);

    Json(PruneResponse {
        pruned,
        remaining: state.registry.count(),
    })
}

/// GET /api/stats - connection statistics
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let connections: Vec<ConnectionInfo> = state
        .registry
        .list()
        .into_iter()
        .map(|record| ConnectionInfo {
            age_secs: record.age(now).as_secs(),
            connected_at: record.created_at.to_rfc3339(),
            id: record.id,
            metadata: record.metadata,
        })
        .collect();

    Json(StatsResponse {
        instance_id: state.config.server.instance_id.clone(),
        total_connections: connections.len(),
        connections,
    })
}
