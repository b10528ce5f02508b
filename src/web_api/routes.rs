//! API Routes

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::{auth, streams};
use crate::capture_service::resolve_image_path;
use crate::config_store::SettingsUpdate;
use crate::error::{Error, Result};
use crate::models::{ApiResponse, SensorState};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::monitor_status))
        // Viewer streams
        .route("/events", get(streams::event_stream))
        .route("/api/ws", get(streams::websocket_handler))
        .route("/video_feed", get(streams::video_feed))
        // Captured stills
        .route("/static/captures/:filename", get(get_capture))
        // Settings
        .route("/api/settings", get(get_settings).put(update_settings))
        // Simulated inputs
        .route("/api/test/sensors", post(set_test_sensors))
        .with_state(state)
}

/// Full application: API routes, presentation files and basic auth
pub fn create_app(state: AppState) -> Router {
    let serve_dir = ServeDir::new(&state.config.static_dir);
    create_router(state.clone())
        .fallback_service(serve_dir)
        .layer(middleware::from_fn_with_state(state, auth::require_basic_auth))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

// ========================================
// Capture Handlers
// ========================================

/// GET /static/captures/:filename
async fn get_capture(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    let path = resolve_image_path(state.monitor.image_dir(), &filename)
        .ok_or_else(|| Error::Validation(format!("invalid capture name: {}", filename)))?;

    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "public, max-age=86400"),
            ],
            bytes,
        )),
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::NotFound(format!("capture {}", filename)))
        }
        Err(e) => {
            tracing::error!(
                filename = %filename,
                path = %path.display(),
                error = %e,
                "Failed to read capture"
            );
            Err(Error::Io(e))
        }
    }
}

// ========================================
// Settings Handlers
// ========================================

/// GET /api/settings
async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.monitor.config().get()))
}

/// PUT /api/settings
async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<impl IntoResponse> {
    let plan = state.monitor.config().update(&update)?;
    Ok(Json(ApiResponse::success(json!({
        "settings": state.monitor.config().get(),
        "reload": plan,
    }))))
}

// ========================================
// Test API (simulated backend only)
// ========================================

/// POST /api/test/sensors
async fn set_test_sensors(
    State(state): State<AppState>,
    Json(sensors): Json<SensorState>,
) -> Result<impl IntoResponse> {
    let sim = state
        .simulator
        .as_ref()
        .ok_or_else(|| Error::NotFound("simulated hardware is not active".to_string()))?;

    sim.gpio.set_sensors(sensors);
    tracing::info!(
        door_open = sensors.door_open,
        motion_detected = sensors.motion_detected,
        "[TEST] Simulated sensor inputs set"
    );

    Ok(Json(ApiResponse::success(sensors)))
}
