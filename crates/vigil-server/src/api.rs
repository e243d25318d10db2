//! HTTP and WebSocket front end.

use crate::feed::Subscription;
use crate::metrics::MetricsRegistry;
use crate::monitors::{Monitors, ServiceError};
use crate::types::{MonitorDocument, MonitorSpec};
use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use vigil::Capability;
use vigil::registry::Description;

/// How often WebSocket clients receive a status message
pub const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Shared state of all handlers
pub struct AppState {
    pub monitors: Arc<Monitors>,
    pub metrics: Option<Arc<MetricsRegistry>>,
    pub started: SystemTime,
}

impl AppState {
    pub fn new(monitors: Arc<Monitors>, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        Self {
            monitors,
            metrics,
            started: SystemTime::now(),
        }
    }
}

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/agent", get(list_agents))
        .route("/transport", get(list_transports))
        .route("/monitor", get(list_monitors))
        .route("/monitor/new", axum::routing::post(add_monitor))
        .route(
            "/monitor/:id",
            get(get_monitor).put(update_monitor).delete(delete_monitor),
        )
        .route("/ws", get(ws_handler))
        .route("/metrics", get(metrics_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serve the API until the listener fails
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(listen_addr = %addr, "API listening");
    }
    axum::serve(listener, router(state)).await
}

/// Service errors as HTTP responses
#[derive(Debug)]
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::InvalidId(_)
            | ServiceError::InvalidJob(_)
            | ServiceError::InvalidHost(_)
            | ServiceError::InvalidInterval => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Store(e) => {
                error!(error = %e, "Store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, Description>> {
    Json(state.monitors.registry().list_available(Some(Capability::Agent)))
}

async fn list_transports(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, Description>> {
    Json(state.monitors.registry().list_available(Some(Capability::Transport)))
}

async fn list_monitors(State(state): State<Arc<AppState>>) -> Result<Json<Vec<MonitorDocument>>, ApiError> {
    Ok(Json(state.monitors.list().await?))
}

async fn add_monitor(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<MonitorSpec>,
) -> Result<Json<MonitorDocument>, ApiError> {
    Ok(Json(state.monitors.add(spec).await?))
}

async fn get_monitor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MonitorDocument>, ApiError> {
    Ok(Json(state.monitors.get(&id).await?))
}

async fn update_monitor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(spec): Json<MonitorSpec>,
) -> Result<Json<MonitorDocument>, ApiError> {
    Ok(Json(state.monitors.update(&id, spec).await?))
}

async fn delete_monitor(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.monitors.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for /metrics
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let Some(metrics) = &state.metrics else {
        return (StatusCode::NOT_FOUND, "metrics disabled").into_response();
    };

    match metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Periodic daemon status pushed to WebSocket clients
#[derive(Debug, Serialize)]
pub struct StatusPayload {
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,

    #[serde(with = "humantime_serde")]
    pub clock: SystemTime,

    #[serde(with = "humantime_serde")]
    pub start: SystemTime,
}

impl StatusPayload {
    pub fn at(started: SystemTime, clock: SystemTime) -> Self {
        let uptime = clock.duration_since(started).unwrap_or_default();
        Self {
            uptime: Duration::from_secs(uptime.as_secs()),
            clock,
            start: started,
        }
    }
}

#[derive(Serialize)]
struct Envelope<T> {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: T,
}

fn status_message(started: SystemTime) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope {
        kind: "status",
        payload: StatusPayload::at(started, SystemTime::now()),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| ws_session(socket, state))
}

async fn ws_session(mut socket: WebSocket, state: Arc<AppState>) {
    let feed = Arc::clone(state.monitors.feed());
    let Subscription { id, mut receiver } = feed.subscribe();
    debug!(subscriber = id, "WebSocket session started");

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let message = tokio::select! {
            _ = ticker.tick() => status_message(state.started),
            event = receiver.recv() => match event {
                Some(event) => serde_json::to_string(&event),
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };

        let text = match message {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode WebSocket message");
                continue;
            }
        };

        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }

    feed.unsubscribe(id);
    debug!(subscriber = id, "WebSocket session ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_payload() {
        let started = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let clock = started + Duration::from_millis(65_400);

        let message = serde_json::to_value(Envelope {
            kind: "status",
            payload: StatusPayload::at(started, clock),
        })
        .unwrap();

        assert_eq!(message["type"], "status");
        assert_eq!(message["payload"]["uptime"], "1m 5s");
        assert_eq!(message["payload"]["start"], "2023-11-14T22:13:20Z");
        assert!(
            message["payload"]["clock"]
                .as_str()
                .unwrap()
                .starts_with("2023-11-14T22:14:25")
        );
    }

    #[test]
    fn test_clock_behind_start() {
        let started = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let payload = StatusPayload::at(started, SystemTime::UNIX_EPOCH);
        assert_eq!(payload.uptime, Duration::ZERO);
    }
}
