//! Application state
//!
//! Holds all shared components and state

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::config_store::ConfigStore;
use crate::device_command::{CommandClient, DEFAULT_COMMAND_TIMEOUT_MS};
use crate::host_status_tracker::HostStatusTracker;
use crate::message_log::{MessageLog, DEFAULT_CAPACITY};
use crate::mqtt_client::MqttClient;
use crate::realtime_hub::RealtimeHub;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Fleet configuration file
    pub fleet_file: PathBuf,
    /// Broker to connect at startup; none starts disconnected
    pub mqtt_broker_ip: Option<String>,
    pub mqtt_broker_port: u16,
    /// Subscribe to the default topics on connect
    pub mqtt_subscribe_defaults: bool,
    pub command_timeout_ms: u64,
    pub message_log_capacity: usize,
    /// Seconds without traffic before a host counts as offline
    pub ping_stale_sec: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8080),
            fleet_file: std::env::var("FLEET_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/fleet.json")),
            mqtt_broker_ip: std::env::var("MQTT_BROKER_IP")
                .ok()
                .filter(|ip| !ip.trim().is_empty()),
            mqtt_broker_port: env_parse("MQTT_BROKER_PORT", 1883),
            mqtt_subscribe_defaults: env_parse("MQTT_SUBSCRIBE_DEFAULTS", true),
            command_timeout_ms: env_parse("COMMAND_TIMEOUT_MS", DEFAULT_COMMAND_TIMEOUT_MS),
            message_log_capacity: env_parse("MESSAGE_LOG_CAPACITY", DEFAULT_CAPACITY),
            ping_stale_sec: env_parse("PING_STALE_SEC", 60),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// ConfigStore (fleet SSoT)
    pub config_store: Arc<ConfigStore>,
    /// Broker connection
    pub mqtt: Arc<MqttClient>,
    /// Device command request/response
    pub commands: Arc<CommandClient>,
    /// Received messages (ring buffer)
    pub message_log: Arc<MessageLog>,
    /// Host liveness
    pub host_status: Arc<HostStatusTracker>,
    /// RealtimeHub (WebSocket)
    pub realtime: Arc<RealtimeHub>,
    pub started_at: Instant,
}
