//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::host_status_tracker::HostConnectionStatus;
use crate::models::{ApiResponse, HealthResponse, StatusResponse};
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        mqtt_connected: state.mqtt.is_connected(),
    };

    Json(response)
}

/// Studio status overview
pub async fn studio_status(State(state): State<AppState>) -> impl IntoResponse {
    let hosts = state.config_store.get_cached_hosts().await;
    let statuses = state.host_status.get_all().await;

    let response = StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        host_count: hosts.len(),
        hosts_online: statuses
            .iter()
            .filter(|s| s.status == HostConnectionStatus::Online)
            .count(),
        mqtt: state.mqtt.status().await,
        logged_messages: state.message_log.count().await,
        pending_commands: state.commands.pending_count().await,
        websocket_clients: state.realtime.connection_count(),
        fleet_file: state.config.fleet_file.display().to_string(),
        has_backup: state.config_store.service().repository().has_backup().await,
    };

    Json(ApiResponse::success(response))
}
