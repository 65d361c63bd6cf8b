use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sse_hub::{open_event_stream, ClientRegistry, ConnectionMetadata, SinkHandle, SseSink};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    /// Registry id to use, e.g. a session id. Generated when absent.
    pub client_id: Option<String>,
    pub user_id: Option<String>,
}

/// Timestamp message pushed on every tick
#[derive(Debug, Serialize)]
pub struct TimeTick {
    pub utc: String,
}

impl TimeTick {
    pub fn now() -> Self {
        Self {
            utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// GET /time - stream the current time every feed interval
pub async fn time_feed(
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
    headers: axum::http::HeaderMap,
) -> Response {
    if state.shutdown.is_cancelled() {
        return shutting_down();
    }

    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string());

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    // A reconnect under the same id takes over; end the stream it replaces
    // so its ticker stops too.
    if let Some(client_id) = &params.client_id {
        if state.registry.remove_by_id(client_id) {
            tracing::info!(
                connection_id = %client_id,
                "Ended previous stream for reconnecting client"
            );
        }
    }

    let (handle, stream) = open_event_stream(state.config.feed.channel_capacity);
    let metadata = ConnectionMetadata {
        ip: client_ip,
        user_id: params.user_id,
        user_agent,
    };
    let connection_id = state
        .registry
        .register(params.client_id, handle.clone(), metadata);

    // shutdown won the race with registration
    if handle.is_ended() {
        return shutting_down();
    }

    let cancel = state.shutdown.child_token();
    start_ticker(
        state.registry.clone(),
        handle.clone(),
        state.config.feed.interval(),
        cancel.clone(),
    );

    let registry = state.registry.clone();
    stream
        .on_disconnect(move || {
            tracing::info!(connection_id = %connection_id, "Time feed disconnected");
            cancel.cancel();
            registry.remove(&handle);
        })
        .into_response()
}

/// Send one tick now, then one every `period` until `cancel` fires or the
/// stream ends
pub fn start_ticker(
    registry: ClientRegistry,
    handle: SinkHandle,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    registry.send(&handle, &TimeTick::now());

    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if handle.is_ended() {
                        break;
                    }
                    registry.send(&handle, &TimeTick::now());
                }
            }
        }
    })
}

fn shutting_down() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::{routing::get, Router};
    use futures::{Stream, StreamExt};
    use sse_hub::client::{parse_payload, subscribe, StreamEvent};
    use sse_hub::ChannelSink;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const PERIOD: Duration = Duration::from_millis(3000);

    fn channel_handle() -> (SinkHandle, mpsc::Receiver<String>) {
        let (sink, rx) = ChannelSink::new(16);
        (Arc::new(sink), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn tick_is_rfc3339_utc_with_millis() {
        let tick = TimeTick::now();
        assert!(tick.utc.ends_with('Z'));
        assert_eq!(tick.utc.len(), "2025-01-01T00:00:00.000Z".len());
        assert!(chrono::DateTime::parse_from_rfc3339(&tick.utc).is_ok());
    }

    #[test]
    fn tick_wire_shape() {
        let tick = TimeTick {
            utc: "2025-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(
            sse_hub::format_message(&tick),
            "data: {\"utc\":\"2025-01-01T00:00:00Z\"}\n\n"
        );
    }

    // ============== Ticker ==============

    #[tokio::test(start_paused = true)]
    async fn ticker_sends_one_tick_immediately() {
        let registry = ClientRegistry::new();
        let (handle, mut rx) = channel_handle();

        let _ticker = start_ticker(registry, handle, PERIOD, CancellationToken::new());

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].starts_with("data: {\"utc\":\""));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_repeats_every_period() {
        let registry = ClientRegistry::new();
        let (handle, mut rx) = channel_handle();

        let _ticker = start_ticker(registry, handle, PERIOD, CancellationToken::new());
        assert_eq!(drain(&mut rx).len(), 1);

        tokio::time::sleep(PERIOD - Duration::from_millis(1)).await;
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(drain(&mut rx).len(), 1);

        tokio::time::sleep(PERIOD * 2).await;
        tokio::task::yield_now().await;
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_stops_when_cancelled() {
        let registry = ClientRegistry::new();
        let (handle, mut rx) = channel_handle();
        let cancel = CancellationToken::new();

        let ticker = start_ticker(registry, handle, PERIOD, cancel.clone());
        drain(&mut rx);
        cancel.cancel();

        ticker.await.unwrap();
        tokio::time::sleep(PERIOD * 3).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_stops_when_stream_ends() {
        let registry = ClientRegistry::new();
        let (handle, rx) = channel_handle();
        registry.register(Some("c1".to_string()), handle.clone(), ConnectionMetadata::default());

        let ticker = start_ticker(registry.clone(), handle, PERIOD, CancellationToken::new());
        drop(rx);

        tokio::time::timeout(PERIOD * 2, ticker)
            .await
            .expect("ticker kept running after the peer left")
            .unwrap();
    }

    // ============== Endpoint ==============

    async fn serve(state: AppState) -> String {
        let app = Router::new()
            .route("/time", get(time_feed))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/time")
    }

    fn fast_state() -> AppState {
        let mut config = AppConfig::default();
        config.feed.interval_ms = 50;
        AppState::new(config)
    }

    async fn next_event<S: Stream<Item = StreamEvent> + Unpin>(events: &mut S) -> StreamEvent {
        tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended without terminal event")
    }

    async fn next_tick<S: Stream<Item = StreamEvent> + Unpin>(events: &mut S) -> String {
        match next_event(events).await {
            StreamEvent::Message(text) => {
                let payload = parse_payload(&text).unwrap();
                payload["utc"].as_str().unwrap().to_string()
            }
            other => panic!("expected tick, got {other:?}"),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn endpoint_streams_ticks_and_cleans_up_on_disconnect() {
        let state = fast_state();
        let url = serve(state.clone()).await;
        let client = reqwest::Client::new();

        let mut events = Box::pin(subscribe(&client, format!("{url}?client_id=c1&user_id=u1")));
        assert!(matches!(next_event(&mut events).await, StreamEvent::Open));

        let first = next_tick(&mut events).await;
        let second = next_tick(&mut events).await;
        assert!(chrono::DateTime::parse_from_rfc3339(&first).is_ok());
        assert!(second >= first);

        let record = state.registry.get("c1").unwrap();
        assert_eq!(record.metadata.user_id.as_deref(), Some("u1"));

        drop(events);
        wait_until(|| state.registry.count() == 0).await;
    }

    #[tokio::test]
    async fn endpoint_reconnect_ends_previous_stream() {
        let state = fast_state();
        let url = format!("{}?client_id=c1", serve(state.clone()).await);
        let client = reqwest::Client::new();

        let mut old = Box::pin(subscribe(&client, url.clone()));
        assert!(matches!(next_event(&mut old).await, StreamEvent::Open));
        next_tick(&mut old).await;

        let mut new = Box::pin(subscribe(&client, url));
        assert!(matches!(next_event(&mut new).await, StreamEvent::Open));
        next_tick(&mut new).await;

        loop {
            match next_event(&mut old).await {
                StreamEvent::Message(_) => continue,
                StreamEvent::Closed => break,
                other => panic!("expected old stream to close, got {other:?}"),
            }
        }
        assert_eq!(state.registry.count(), 1);
        next_tick(&mut new).await;
    }

    #[tokio::test]
    async fn endpoint_refuses_after_shutdown() {
        let state = fast_state();
        let url = serve(state.clone()).await;
        state.shutdown.cancel();

        let response = reqwest::get(url).await.unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.registry.count(), 0);
    }

    #[tokio::test]
    async fn endpoint_refuses_once_registry_is_closed() {
        let state = fast_state();
        let url = serve(state.clone()).await;
        state
            .registry
            .broadcast_and_close_all(&serde_json::json!({"type": "shutdown"}));

        let response = reqwest::get(url).await.unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.registry.count(), 0);
    }
}
