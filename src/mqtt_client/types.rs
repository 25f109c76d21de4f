//! MQTT message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::topics::topic_matches;

/// Topics the studio listens on when connecting with `is_subscribe`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultTopics {
    pub detections: String,
    pub settings: String,
    pub command: String,
}

impl Default for DefaultTopics {
    fn default() -> Self {
        Self {
            detections: "larch/detections".to_string(),
            settings: "cs/settings".to_string(),
            command: "cs/command".to_string(),
        }
    }
}

impl DefaultTopics {
    pub fn all(&self) -> [&str; 3] {
        [
            self.detections.as_str(),
            self.settings.as_str(),
            self.command.as_str(),
        ]
    }

    /// Route a received topic to its handler kind
    pub fn classify(&self, topic: &str) -> MessageKind {
        if topic_matches(&self.detections, topic) {
            MessageKind::Detections
        } else if topic_matches(&self.settings, topic) {
            MessageKind::Settings
        } else if topic_matches(&self.command, topic) {
            MessageKind::Command
        } else {
            MessageKind::Misc
        }
    }
}

/// Handler a received publish is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Detections,
    Settings,
    Command,
    Misc,
}

/// A received publish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttMessage {
    /// Assigned by the message log; 0 until stored
    #[serde(default)]
    pub message_id: u64,
    pub topic: String,
    pub kind: MessageKind,
    /// Payload decoded as UTF-8 (invalid sequences replaced)
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl MqttMessage {
    pub fn new(topic: impl Into<String>, kind: MessageKind, payload: &[u8]) -> Self {
        Self {
            message_id: 0,
            topic: topic.into(),
            kind,
            payload: String::from_utf8_lossy(payload).into_owned(),
            received_at: Utc::now(),
        }
    }

    /// Payload parsed as JSON, if it is JSON
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.payload).ok()
    }
}

/// Connection snapshot for the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttStatus {
    pub connected: bool,
    pub broker_ip: Option<String>,
    pub broker_port: Option<u16>,
    pub default_topics_subscribed: bool,
    pub misc_topics: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_default_topics() {
        let topics = DefaultTopics::default();
        assert_eq!(topics.classify("larch/detections"), MessageKind::Detections);
        assert_eq!(topics.classify("cs/settings"), MessageKind::Settings);
        assert_eq!(topics.classify("cs/command"), MessageKind::Command);
        assert_eq!(topics.classify("kuka/data"), MessageKind::Misc);
    }

    #[test]
    fn test_payload_lossy_utf8() {
        let msg = MqttMessage::new("t", MessageKind::Misc, &[b'o', b'k', 0xff]);
        assert!(msg.payload.starts_with("ok"));
        assert!(msg.json().is_none());

        let msg = MqttMessage::new("t", MessageKind::Misc, br#"{"a":1}"#);
        assert_eq!(msg.json().unwrap()["a"], 1);
    }
}
