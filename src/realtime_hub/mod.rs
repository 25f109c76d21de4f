//! RealtimeHub - WebSocket Distribution
//!
//! ## Responsibilities
//!
//! - WebSocket connection management
//! - Live MQTT message feed (optionally filtered per client by topic)
//! - Host status transitions and command results
//!
//! Each message is serialized once and fanned out as `{"type", "data"}` text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::device_command::CommandResponse;
use crate::host_status_tracker::{HostConnectionStatus, HostStatusEvent};
use crate::mqtt_client::{topic_matches, MqttMessage, MqttStatus};

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    MqttMessage(MqttMessage),
    HostStatus(HostStatusMessage),
    CommandResult(CommandResultMessage),
    /// Broker connection changed
    MqttConnection(MqttStatus),
}

impl HubMessage {
    fn type_name(&self) -> &'static str {
        match self {
            HubMessage::MqttMessage(_) => "mqtt_message",
            HubMessage::HostStatus(_) => "host_status",
            HubMessage::CommandResult(_) => "command_result",
            HubMessage::MqttConnection(_) => "mqtt_connection",
        }
    }
}

/// Host status transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStatusMessage {
    pub host_id: String,
    pub status: HostConnectionStatus,
    pub event: HostStatusEvent,
    pub timestamp: String,
}

/// Outcome of a device command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResultMessage {
    pub host_id: String,
    pub command_id: i32,
    pub ok: bool,
    /// Present when the device answered
    pub response: Option<CommandResponse>,
    /// Set on timeout, transport or device errors
    pub error: Option<String>,
}

struct ClientConnection {
    id: Uuid,
    /// Only MQTT messages on matching topics are forwarded
    topic_filter: Option<String>,
    tx: mpsc::UnboundedSender<String>,
}

impl ClientConnection {
    fn wants(&self, message: &HubMessage) -> bool {
        match (message, &self.topic_filter) {
            (HubMessage::MqttMessage(m), Some(filter)) => topic_matches(filter, &m.topic),
            _ => true,
        }
    }
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(
        &self,
        topic_filter: Option<String>,
    ) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.connections.write().await.insert(
            id,
            ClientConnection {
                id,
                topic_filter: topic_filter.clone(),
                tx,
            },
        );
        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, topic_filter = ?topic_filter, "Client connected");

        (id, rx)
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Client disconnected");
        }
    }

    /// Change the MQTT topic filter of a client
    pub async fn set_topic_filter(&self, id: &Uuid, topic_filter: Option<String>) -> bool {
        match self.connections.write().await.get_mut(id) {
            Some(conn) => {
                conn.topic_filter = topic_filter;
                true
            }
            None => false,
        }
    }

    /// Broadcast message to all interested clients, returns how many got it
    pub async fn broadcast(&self, message: HubMessage) -> usize {
        tracing::trace!(message_type = %message.type_name(), "Broadcasting message to clients");

        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return 0;
            }
        };

        let connections = self.connections.read().await;
        let mut sent = 0;
        for conn in connections.values().filter(|c| c.wants(&message)) {
            match conn.tx.send(json.clone()) {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send message")
                }
            }
        }
        sent
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_client::MessageKind;

    fn mqtt(topic: &str) -> HubMessage {
        HubMessage::MqttMessage(MqttMessage::new(topic, MessageKind::Misc, b"1"))
    }

    #[tokio::test]
    async fn test_broadcast_envelope() {
        let hub = RealtimeHub::new();
        let (_, mut rx) = hub.register(None).await;

        assert_eq!(hub.broadcast(mqtt("cs/ping")).await, 1);
        let text = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "mqtt_message");
        assert_eq!(value["data"]["topic"], "cs/ping");
    }

    #[tokio::test]
    async fn test_topic_filter() {
        let hub = RealtimeHub::new();
        let (id, mut rx) = hub.register(Some("larch/#".to_string())).await;

        assert_eq!(hub.broadcast(mqtt("cs/ping")).await, 0);
        assert_eq!(hub.broadcast(mqtt("larch/detections")).await, 1);
        assert!(rx.recv().await.unwrap().contains("larch/detections"));

        // non-MQTT messages ignore the filter
        let status = HubMessage::HostStatus(HostStatusMessage {
            host_id: "orin-01".to_string(),
            status: HostConnectionStatus::Offline,
            event: HostStatusEvent::Lost,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        });
        assert_eq!(hub.broadcast(status).await, 1);

        assert!(hub.set_topic_filter(&id, None).await);
        assert_eq!(hub.broadcast(mqtt("cs/ping")).await, 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let hub = RealtimeHub::new();
        let (id, _rx) = hub.register(None).await;
        assert_eq!(hub.connection_count(), 1);
        hub.unregister(&id).await;
        hub.unregister(&id).await;
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.broadcast(mqtt("x")).await, 0);
    }
}
