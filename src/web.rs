//! Axum-based HTTP server for the operator API and dashboard
//!
//! Handlers never touch the live phase records: they read the driver's
//! published snapshots from a watch channel and submit operator requests over
//! the command channel. Out-of-range indices and unknown mode strings are
//! rejected here at the boundary; safety denials further in are diagnostics,
//! not HTTP errors.

use crate::driver::{DriverCommand, StatusSnapshot, SystemMode};
use crate::hal::PHASE_COUNT;
use crate::phase::PHASE_NAMES;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::StreamExt;
use tower_http::services::ServeDir;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    /// Latest consistent status snapshot from the driver
    pub snapshot_rx: watch::Receiver<Arc<StatusSnapshot>>,

    /// Latest trend history rows from the driver
    pub history_rx: watch::Receiver<Arc<Vec<[f64; PHASE_COUNT]>>>,

    /// Command channel into the driver
    pub commands_tx: mpsc::UnboundedSender<DriverCommand>,

    /// Status broadcast feeding the SSE event stream
    pub status_tx: broadcast::Sender<String>,

    /// Log file path for the tail endpoint
    pub log_file: String,
}

#[derive(Deserialize)]
pub struct PhaseBody {
    pub phase: usize,
}

#[derive(Deserialize)]
pub struct ModeBody {
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct TailParams {
    pub lines: Option<usize>,
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.snapshot_rx.borrow().as_ref().clone();
    Json(snapshot)
}

pub async fn set_phase(
    State(state): State<AppState>,
    Json(body): Json<PhaseBody>,
) -> impl IntoResponse {
    if body.phase >= PHASE_COUNT {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "message": "Invalid phase number",
            })),
        );
    }

    if state
        .commands_tx
        .send(DriverCommand::SelectPhase(body.phase))
        .is_err()
    {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "success": false,
                "message": "Driver unavailable",
            })),
        );
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "message": format!("Switch to {} requested", PHASE_NAMES[body.phase]),
        })),
    )
}

pub async fn set_mode(
    State(state): State<AppState>,
    Json(body): Json<ModeBody>,
) -> impl IntoResponse {
    let Some(mode) = SystemMode::parse(&body.mode) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "message": "Invalid mode",
            })),
        );
    };

    if state
        .commands_tx
        .send(DriverCommand::SetMode(mode))
        .is_err()
    {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "success": false,
                "message": "Driver unavailable",
            })),
        );
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "message": format!("Mode set to {}", mode.as_str()),
        })),
    )
}

pub async fn history(State(state): State<AppState>) -> impl IntoResponse {
    let rows = state.history_rx.borrow().as_ref().clone();
    Json(serde_json::json!({ "history": rows }))
}

pub async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.status_tx.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(payload) => Some(Ok::<Event, std::convert::Infallible>(
            Event::default().event("status").data(payload),
        )),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn logs_tail(
    State(state): State<AppState>,
    Query(params): Query<TailParams>,
) -> impl IntoResponse {
    let max_lines = params.lines.unwrap_or(200).min(10_000);
    match tokio::fs::read_to_string(&state.log_file).await {
        Ok(contents) => {
            let mut lines: Vec<&str> = contents.lines().collect();
            if lines.len() > max_lines {
                lines = lines.split_off(lines.len() - max_lines);
            }
            let body = lines.join("\n");
            let mut resp = Response::new(body.into());
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            resp
        }
        Err(_) => (StatusCode::NOT_FOUND, "Log file not available").into_response(),
    }
}

pub async fn logs_stream() -> impl IntoResponse {
    let rx = crate::logging::subscribe_log_lines();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(line) => Some(Ok::<Event, std::convert::Infallible>(
            Event::default().event("log").data(line),
        )),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/phase", post(set_phase))
        .route("/api/mode", post(set_mode))
        .route("/api/history", get(history))
        .route("/api/events", get(events))
        .route("/api/logs/tail", get(logs_tail))
        .route("/api/logs/stream", get(logs_stream))
        .fallback_service(ServeDir::new("./webui").append_index_html_on_directories(true))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let router = build_router(state);

    let logger = crate::logging::get_logger("web");
    logger.info(&format!(
        "Starting web server; requested host={}, port={}",
        host, port
    ));

    let (addr, parsed_ok): (SocketAddr, bool) = match host.parse::<IpAddr>() {
        Ok(ip) => (SocketAddr::new(ip, port), true),
        Err(_) => (([127, 0, 0, 1], port).into(), false),
    };
    if !parsed_ok {
        logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{} (UI /, API /api)",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router).await?;
    Ok(())
}
