//! Shared API models

use serde::{Deserialize, Serialize};

use crate::mqtt_client::MqttStatus;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub mqtt_connected: bool,
}

/// Studio status overview
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_sec: u64,
    pub host_count: usize,
    pub hosts_online: usize,
    pub mqtt: MqttStatus,
    pub logged_messages: usize,
    pub pending_commands: usize,
    pub websocket_clients: u64,
    pub fleet_file: String,
    pub has_backup: bool,
}
