//! Monitor - MQTT Message Pump
//!
//! ## Responsibilities
//!
//! - Consume every publish the MQTT client receives
//! - Log it, resolve command responses, store reported settings
//! - Track host liveness from reply traffic and sweep stale hosts
//! - Forward messages and status transitions to WebSocket clients

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config_store::ConfigStore;
use crate::device_command::CommandClient;
use crate::fleet::Host;
use crate::host_status_tracker::{HostConnectionStatus, HostStatusEvent, HostStatusTracker};
use crate::message_log::MessageLog;
use crate::mqtt_client::{MessageKind, MqttClient, MqttMessage};
use crate::realtime_hub::{HostStatusMessage, HubMessage, RealtimeHub};

/// Monitor instance
pub struct Monitor {
    mqtt: Arc<MqttClient>,
    commands: Arc<CommandClient>,
    config_store: Arc<ConfigStore>,
    message_log: Arc<MessageLog>,
    tracker: Arc<HostStatusTracker>,
    hub: Arc<RealtimeHub>,
}

impl Monitor {
    pub fn new(
        mqtt: Arc<MqttClient>,
        commands: Arc<CommandClient>,
        config_store: Arc<ConfigStore>,
        message_log: Arc<MessageLog>,
        tracker: Arc<HostStatusTracker>,
        hub: Arc<RealtimeHub>,
    ) -> Self {
        Self {
            mqtt,
            commands,
            config_store,
            message_log,
            tracker,
            hub,
        }
    }

    /// Spawn the pump task
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.mqtt.subscribe_messages();
        tokio::spawn(async move {
            tracing::info!("Monitor started");
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        self.handle_message(message).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped = skipped, "Monitor lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::info!("Monitor stopped");
        })
    }

    /// Spawn the periodic stale-host sweep
    pub fn start_sweeper(self: Arc<Self>, every: Duration, max_age: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                self.sweep(max_age).await;
            }
        })
    }

    /// Process one received message; returns it as logged
    pub async fn handle_message(&self, message: MqttMessage) -> MqttMessage {
        let message = self.message_log.add(message).await;

        if let Some(host) = self.settings_sender(&message).await {
            if let Err(e) = self.commands.record_settings(&host.id, &message).await {
                tracing::warn!(host_id = %host.id, error = %e, "Failed to store reported settings");
            }
        }

        let mut seen_host = self
            .config_store
            .find_host_by_topic(&message.topic)
            .await
            .map(|h| h.id);

        if let Some(response) = self.commands.handle_message(&message).await {
            if seen_host.is_none() && self.config_store.get_cached_host(&response.device_id).await.is_some() {
                seen_host = Some(response.device_id);
            }
        }

        if let Some(host_id) = seen_host {
            if let Some(event) = self.tracker.mark_seen(&host_id).await {
                self.broadcast_status(&host_id, event).await;
            }
        }

        self.hub
            .broadcast(HubMessage::MqttMessage(message.clone()))
            .await;
        message
    }

    /// Mark hosts silent for longer than `max_age` Offline
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let events = self.tracker.sweep_stale(max_age).await;
        for (host_id, event) in &events {
            self.broadcast_status(host_id, *event).await;
        }
        events.len()
    }

    /// Host that published a settings document, by topic or by embedded id
    async fn settings_sender(&self, message: &MqttMessage) -> Option<Host> {
        if let Some(host) = self
            .config_store
            .find_host_by_settings_topic(&message.topic)
            .await
        {
            return Some(host);
        }
        if message.kind != MessageKind::Settings {
            return None;
        }
        let root = message.json()?;
        let id = root.pointer("/settings/id").and_then(Value::as_str)?;
        self.config_store.get_cached_host(id).await
    }

    async fn broadcast_status(&self, host_id: &str, event: HostStatusEvent) {
        broadcast_host_status(&self.hub, host_id, event).await;
    }
}

/// Push a liveness transition to WebSocket clients
pub async fn broadcast_host_status(hub: &RealtimeHub, host_id: &str, event: HostStatusEvent) {
    let status = match event {
        HostStatusEvent::Lost => HostConnectionStatus::Offline,
        HostStatusEvent::Recovered => HostConnectionStatus::Online,
    };
    hub.broadcast(HubMessage::HostStatus(HostStatusMessage {
        host_id: host_id.to_string(),
        status,
        event,
        timestamp: Utc::now().to_rfc3339(),
    }))
    .await;
}

/// Subscribe to the reply topics of every host
///
/// Returns how many topics are subscribed; zero while disconnected.
pub async fn subscribe_reply_topics(mqtt: &MqttClient, hosts: &[Host]) -> crate::Result<usize> {
    let mut count = 0;
    for topic in hosts.iter().flat_map(Host::reply_topics) {
        if mqtt.ensure_subscribed(topic).await? {
            count += 1;
        }
    }
    if count > 0 {
        tracing::info!(topics = count, "Subscribed to host reply topics");
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::FleetRepository;
    use crate::device_command::DEFAULT_COMMAND_TIMEOUT_MS;
    use serde_json::json;

    struct Fixture {
        monitor: Arc<Monitor>,
        mqtt: Arc<MqttClient>,
        commands: Arc<CommandClient>,
        log: Arc<MessageLog>,
        tracker: Arc<HostStatusTracker>,
        hub: Arc<RealtimeHub>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ConfigStore::new(FleetRepository::new(dir.path().join("fleet.json")))
                .await
                .unwrap(),
        );
        store
            .service()
            .create_host(Host {
                id: "orin-01".to_string(),
                mqtt_response_topic: "cs/orin-01/response".to_string(),
                mqtt_ping_topic: "cs/orin-01/ping".to_string(),
                mqtt_settings_get_topic: "cs/orin-01/settings".to_string(),
                ..Host::default()
            })
            .await
            .unwrap();
        store.refresh_cache().await.unwrap();

        let mqtt = Arc::new(MqttClient::new());
        let commands = Arc::new(CommandClient::new(mqtt.clone(), DEFAULT_COMMAND_TIMEOUT_MS));
        let log = Arc::new(MessageLog::default());
        let tracker = Arc::new(HostStatusTracker::new());
        let hub = Arc::new(RealtimeHub::new());
        let monitor = Arc::new(Monitor::new(
            mqtt.clone(),
            commands.clone(),
            store,
            log.clone(),
            tracker.clone(),
            hub.clone(),
        ));
        Fixture {
            monitor,
            mqtt,
            commands,
            log,
            tracker,
            hub,
            _dir: dir,
        }
    }

    fn message(topic: &str, kind: MessageKind, payload: Value) -> MqttMessage {
        MqttMessage::new(topic, kind, payload.to_string().as_bytes())
    }

    #[tokio::test]
    async fn test_ping_marks_host_seen() {
        let f = fixture().await;
        let (_, mut ws) = f.hub.register(None).await;

        let logged = f
            .monitor
            .handle_message(message("cs/orin-01/ping", MessageKind::Misc, json!({})))
            .await;
        assert_eq!(logged.message_id, 1);
        assert_eq!(f.log.count().await, 1);
        assert_eq!(
            f.tracker.get_status("orin-01").await.status,
            HostConnectionStatus::Online
        );
        assert!(ws.recv().await.unwrap().contains("mqtt_message"));
    }

    #[tokio::test]
    async fn test_unrelated_topic_only_logged() {
        let f = fixture().await;
        f.monitor
            .handle_message(message("larch/detections", MessageKind::Detections, json!([])))
            .await;
        assert_eq!(f.log.count().await, 1);
        assert!(f.tracker.get_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_settings_recorded() {
        let f = fixture().await;
        let doc = json!({
            "config_version_high": 1,
            "config_version_low": 10,
            "settings": {"id": "orin-01", "cameras": []}
        });
        f.monitor
            .handle_message(message("cs/orin-01/settings", MessageKind::Misc, doc.clone()))
            .await;
        assert!(f.commands.reported_settings("orin-01").await.is_some());

        // default settings topic, sender found by embedded id
        let f = fixture().await;
        f.monitor
            .handle_message(message("cs/settings", MessageKind::Settings, doc))
            .await;
        assert!(f.commands.reported_settings("orin-01").await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_broadcasts_lost() {
        let f = fixture().await;
        let (_, mut ws) = f.hub.register(Some("none".to_string())).await;
        f.tracker.update_status("orin-01", false).await;
        f.monitor
            .handle_message(message("cs/orin-01/response", MessageKind::Misc, json!({})))
            .await;
        let recovered = ws.recv().await.unwrap();
        assert!(recovered.contains("Recovered"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.monitor.sweep(Duration::from_millis(1)).await, 1);
        assert!(ws.recv().await.unwrap().contains("Lost"));
    }

    #[tokio::test]
    async fn test_subscribe_reply_topics_disconnected() {
        let f = fixture().await;
        let hosts = vec![Host {
            id: "x".to_string(),
            mqtt_ping_topic: "cs/x/ping".to_string(),
            ..Host::default()
        }];
        assert_eq!(subscribe_reply_topics(&f.mqtt, &hosts).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pump_task_consumes_broadcast() {
        let f = fixture().await;
        let handle = f.monitor.clone().start();

        f.mqtt.inject("cs/orin-01/ping", b"{}");
        for _ in 0..50 {
            if f.log.count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.log.count().await, 1);
        assert_eq!(f.commands.pending_count().await, 0);
        handle.abort();
    }
}
