//! AGL Studio Library
//!
//! Fleet configuration and monitoring for vision devices ("hosts") that run
//! cameras and detector pipelines and talk MQTT.
//!
//! ## Architecture
//!
//! 1. JsonFields - Typed field accessors, dynamic settings, path edits
//! 2. Fleet - Host / Camera / Detector model and the device document
//! 3. ConfigStore - SSoT for the fleet, file-backed with backup
//! 4. MqttClient - Broker connection, default and misc subscriptions
//! 5. DeviceCommand - Request/response protocol over MQTT
//! 6. MessageLog - Received messages (ring buffer)
//! 7. HostStatusTracker - Host liveness
//! 8. RealtimeHub - WebSocket distribution
//! 9. Monitor - Message pump tying the above together
//! 10. WebAPI - REST API endpoints

pub mod config_store;
pub mod device_command;
pub mod error;
pub mod fleet;
pub mod host_status_tracker;
pub mod json_fields;
pub mod message_log;
pub mod models;
pub mod monitor;
pub mod mqtt_client;
pub mod realtime_hub;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
