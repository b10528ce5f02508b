//! WebAPI - HTTP surface of the monitor
//!
//! ## Responsibilities
//!
//! - Status and health endpoints
//! - Event (SSE/WebSocket) and MJPEG live streams
//! - Captured still delivery
//! - Settings read/update
//! - Optional basic auth

mod auth;
mod routes;
mod streams;

pub use routes::{create_app, create_router};
pub use streams::MJPEG_BOUNDARY;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::models::HealthResponse;
use crate::monitor_loop::MonitorPhase;
use crate::state::AppState;

/// Health check endpoint
///
/// `degraded` while the loop is not running or the host is overloaded.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let phase = state.monitor.phase();
    let overloaded = state.system_health.read().await.overloaded;
    let status = if phase == MonitorPhase::Running && !overloaded {
        "ok"
    } else {
        "degraded"
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        phase: phase.as_str().to_string(),
    };

    Json(response)
}

/// Monitor status: latest state, last event, counters and host load
pub async fn monitor_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.monitor.status();
    let publisher = state.monitor.publisher();
    let system_health = state.system_health.read().await.clone();

    Json(json!({
        "phase": state.monitor.phase(),
        "state": status.state,
        "last_event": status.last_event,
        "last_poll_at": status.last_poll_at.map(|t| t.to_rfc3339()),
        "counters": status.counters,
        "subscribers": publisher.subscriber_count().await,
        "events_published": publisher.published_count(),
        "frame_revision": state.monitor.frames().revision().value(),
        "system_health": system_health,
        "uptime_sec": state.started_at.elapsed().as_secs(),
    }))
}
