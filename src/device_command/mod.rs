//! DeviceCommand - Request/Response Over MQTT
//!
//! ## Responsibilities
//!
//! - Build and publish command envelopes on a host's command topic
//! - Correlate responses by `req_id` and wake the waiting caller
//! - Keep the last settings document each host published
//!
//! A request that gets no answer within the timeout fails with
//! `Error::Timeout` and its pending entry is dropped; a late answer is then
//! logged and ignored.

mod types;

pub use types::*;

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::fleet::{parse_document, ConfigVersion, Host};
use crate::json_fields::{lenient, JsonFields};
use crate::mqtt_client::{MqttClient, MqttMessage};

/// Default wait for a device response
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

struct PendingCommand {
    host_id: String,
    command_id: CommandId,
    tx: oneshot::Sender<CommandResponse>,
}

/// CommandClient instance
pub struct CommandClient {
    mqtt: Arc<MqttClient>,
    pending: Mutex<HashMap<u64, PendingCommand>>,
    next_req_id: AtomicU64,
    timeout: Duration,
    reported: RwLock<HashMap<String, ReportedSettings>>,
}

impl CommandClient {
    /// Create new CommandClient
    pub fn new(mqtt: Arc<MqttClient>, timeout_ms: u64) -> Self {
        // seeded from the clock so ids stay unique across restarts
        let seed = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(1);
        Self {
            mqtt,
            pending: Mutex::new(HashMap::new()),
            next_req_id: AtomicU64::new(seed),
            timeout: Duration::from_millis(timeout_ms),
            reported: RwLock::new(HashMap::new()),
        }
    }

    /// Send a command to `host` and wait for its response
    pub async fn send(
        &self,
        host: &Host,
        command_id: CommandId,
        values: Vec<ItemValue>,
    ) -> Result<CommandResponse> {
        if host.mqtt_command_topic.is_empty() {
            return Err(Error::Validation(format!(
                "Host {} has no command topic",
                host.id
            )));
        }
        if !self.mqtt.is_connected() {
            return Err(Error::Mqtt("not connected".to_string()));
        }

        for topic in host.reply_topics() {
            self.mqtt.ensure_subscribed(topic).await?;
        }

        let req_id = self.next_req_id.fetch_add(1, Ordering::SeqCst);
        let request = CommandRequest::new(req_id, command_id, &host.id, values);
        let body = serde_json::to_vec(&request)?;

        let rx = self.register(req_id, &host.id, command_id).await;

        if let Err(e) = self.mqtt.publish(&host.mqtt_command_topic, body).await {
            self.pending.lock().await.remove(&req_id);
            return Err(e);
        }

        tracing::info!(
            host_id = %host.id,
            req_id = req_id,
            command = ?command_id,
            "Command sent"
        );

        let response = match timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(Error::Internal(format!(
                    "response channel for request {} closed",
                    req_id
                )))
            }
            Err(_) => {
                self.pending.lock().await.remove(&req_id);
                tracing::warn!(host_id = %host.id, req_id = req_id, "Command timed out");
                return Err(Error::Timeout(format!(
                    "no response from {} to request {}",
                    host.id, req_id
                )));
            }
        };

        if response.is_ok() {
            Ok(response)
        } else {
            Err(Error::Device {
                host_id: host.id.clone(),
                code: i32::from(response.error_code),
                message: if response.error_string.is_empty() {
                    response.error_code.to_string()
                } else {
                    response.error_string.clone()
                },
            })
        }
    }

    pub async fn ping(&self, host: &Host) -> Result<CommandResponse> {
        self.send(host, CommandId::Ping, Vec::new()).await
    }

    pub async fn set_settings(&self, host: &Host, values: Vec<ItemValue>) -> Result<CommandResponse> {
        if values.is_empty() {
            return Err(Error::Validation("no values to set".to_string()));
        }
        self.send(host, CommandId::SetSettings, values).await
    }

    async fn register(
        &self,
        req_id: u64,
        host_id: &str,
        command_id: CommandId,
    ) -> oneshot::Receiver<CommandResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            req_id,
            PendingCommand {
                host_id: host_id.to_string(),
                command_id,
                tx,
            },
        );
        rx
    }

    /// Number of commands awaiting a response
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Feed a received message; resolves the matching waiter
    ///
    /// Returns the parsed response when the message was one.
    pub async fn handle_message(&self, message: &MqttMessage) -> Option<CommandResponse> {
        let response = parse_response(&message.payload)?;

        match self.pending.lock().await.remove(&response.req_id) {
            Some(pending) => {
                if pending.host_id != response.device_id {
                    tracing::warn!(
                        req_id = response.req_id,
                        expected = %pending.host_id,
                        device_id = %response.device_id,
                        "Response device id does not match request"
                    );
                }
                tracing::debug!(
                    req_id = response.req_id,
                    command = ?pending.command_id,
                    error_code = %response.error_code,
                    "Command response received"
                );
                if pending.tx.send(response.clone()).is_err() {
                    tracing::debug!(req_id = response.req_id, "Waiter already gone");
                }
            }
            None => {
                tracing::debug!(
                    req_id = response.req_id,
                    topic = %message.topic,
                    "Response for unknown request"
                );
            }
        }

        Some(response)
    }

    /// Store a settings document published by `host_id`
    pub async fn record_settings(&self, host_id: &str, message: &MqttMessage) -> Result<ConfigVersion> {
        let document: Value = serde_json::from_str(&message.payload)
            .map_err(|e| Error::Parse(format!("settings from {}: {}", host_id, e)))?;

        let version = document
            .as_object()
            .map(|root| {
                ConfigVersion::new(
                    root.get_int("config_version_high", 0),
                    root.get_int("config_version_low", 0),
                )
            })
            .unwrap_or_default();

        let parse_error = parse_document(&document).err().map(|e| e.to_string());
        if let Some(err) = &parse_error {
            tracing::warn!(host_id = %host_id, error = %err, "Reported settings not readable");
        }

        let reported = ReportedSettings {
            host_id: host_id.to_string(),
            version,
            received_at: message.received_at,
            document,
            parse_error,
        };
        self.reported
            .write()
            .await
            .insert(host_id.to_string(), reported);

        tracing::info!(host_id = %host_id, version = %version, "Reported settings stored");
        Ok(version)
    }

    pub async fn reported_settings(&self, host_id: &str) -> Option<ReportedSettings> {
        self.reported.read().await.get(host_id).cloned()
    }

    /// Reported settings parsed as a host record
    pub async fn reported_host(&self, host_id: &str) -> Option<Host> {
        let reported = self.reported_settings(host_id).await?;
        parse_document(&reported.document).ok()
    }
}

/// Parse a response envelope
///
/// `None` for anything that is not a response of the supported version.
/// Numbers are read leniently: some device firmwares quote them.
pub fn parse_response(payload: &str) -> Option<CommandResponse> {
    let root: Value = serde_json::from_str(payload).ok()?;
    let root = root.as_object()?;
    let Some(Value::Object(response)) = root.get("response") else {
        return None;
    };

    let high = lenient::get_int(root, "command_version_high", 0);
    let low = lenient::get_int(root, "command_version_low", 0);
    if high != COMMAND_VERSION_HIGH || low != COMMAND_VERSION_LOW {
        tracing::warn!(version = %format!("{}.{}", high, low), "Unsupported command response version");
        return None;
    }

    let req_id = u64::try_from(lenient::get_i64(root, "req_id", -1)).ok()?;

    Some(CommandResponse {
        ts: lenient::get_i64(root, "ts", 0),
        req_id,
        command_id: lenient::get_int(response, "command_id", 0),
        device_id: response.get_string("device_id", ""),
        error_code: DeviceErrorCode::from(lenient::get_int(response, "error_code", 1)),
        error_string: response.get_string("error_string", ""),
    })
}
