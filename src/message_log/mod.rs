//! MessageLog - Received MQTT Messages (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Keep the most recent publishes for the monitor views
//! - Assign monotonically increasing message ids
//! - Query by any combination of topic filter, kind and id cursor

use std::collections::VecDeque;
use tokio::sync::RwLock;

use crate::mqtt_client::{topic_matches, MessageKind, MqttMessage};

/// Default number of retained messages
pub const DEFAULT_CAPACITY: usize = 2000;

/// Conditions a message must meet to be returned; unset fields match anything
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Topic filter, wildcards allowed
    pub topic: Option<String>,
    pub kind: Option<MessageKind>,
    /// Only messages with a larger id
    pub after: Option<u64>,
}

impl MessageFilter {
    pub fn matches(&self, message: &MqttMessage) -> bool {
        self.topic
            .as_deref()
            .map_or(true, |filter| topic_matches(filter, &message.topic))
            && self.kind.map_or(true, |kind| message.kind == kind)
            && self.after.map_or(true, |after| message.message_id > after)
    }
}

struct MessageRingBuffer {
    messages: VecDeque<MqttMessage>,
    capacity: usize,
    next_id: u64,
}

impl MessageRingBuffer {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    fn push(&mut self, mut message: MqttMessage) -> MqttMessage {
        message.message_id = self.next_id;
        self.next_id += 1;

        if self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message.clone());
        message
    }

    /// Newest first
    fn latest<'a>(
        &'a self,
        count: usize,
        filter: impl Fn(&MqttMessage) -> bool + 'a,
    ) -> Vec<MqttMessage> {
        self.messages
            .iter()
            .rev()
            .filter(|m| filter(m))
            .take(count)
            .cloned()
            .collect()
    }
}

/// MessageLog instance
pub struct MessageLog {
    buffer: RwLock<MessageRingBuffer>,
}

impl MessageLog {
    /// Create new MessageLog
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(MessageRingBuffer::new(capacity)),
        }
    }

    /// Store a message, returning it with its assigned id
    pub async fn add(&self, message: MqttMessage) -> MqttMessage {
        let stored = self.buffer.write().await.push(message);
        tracing::trace!(message_id = stored.message_id, topic = %stored.topic, "Message logged");
        stored
    }

    pub async fn get_latest(&self, count: usize) -> Vec<MqttMessage> {
        self.query(&MessageFilter::default(), count).await
    }

    /// Latest messages whose topic matches `filter` (wildcards allowed)
    pub async fn get_by_topic(&self, filter: &str, count: usize) -> Vec<MqttMessage> {
        let filter = MessageFilter {
            topic: Some(filter.to_string()),
            ..MessageFilter::default()
        };
        self.query(&filter, count).await
    }

    /// Messages meeting every condition of `filter`, at most `count`
    ///
    /// With a cursor (`after`) the oldest matches come first so callers can
    /// page forward; otherwise the newest come first.
    pub async fn query(&self, filter: &MessageFilter, count: usize) -> Vec<MqttMessage> {
        let buffer = self.buffer.read().await;
        if filter.after.is_some() {
            buffer
                .messages
                .iter()
                .filter(|m| filter.matches(m))
                .take(count)
                .cloned()
                .collect()
        } else {
            buffer.latest(count, |m| filter.matches(m))
        }
    }

    pub async fn count(&self) -> usize {
        self.buffer.read().await.messages.len()
    }

    pub async fn clear(&self) -> usize {
        let mut buffer = self.buffer.write().await;
        let removed = buffer.messages.len();
        buffer.messages.clear();
        removed
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(topic: &str, kind: MessageKind) -> MqttMessage {
        MqttMessage::new(topic, kind, b"{}")
    }

    #[tokio::test]
    async fn test_ring_buffer_drops_oldest() {
        let log = MessageLog::new(3);
        for i in 0..5 {
            log.add(msg(&format!("t/{}", i), MessageKind::Misc)).await;
        }

        assert_eq!(log.count().await, 3);
        let latest = log.get_latest(10).await;
        assert_eq!(latest[0].topic, "t/4");
        assert_eq!(latest[0].message_id, 5);
        assert_eq!(latest[2].topic, "t/2");
    }

    #[tokio::test]
    async fn test_query_by_topic_and_kind() {
        let log = MessageLog::default();
        log.add(msg("larch/detections", MessageKind::Detections)).await;
        log.add(msg("cs/orin-01/ping", MessageKind::Misc)).await;
        log.add(msg("cs/orin-02/ping", MessageKind::Misc)).await;

        assert_eq!(log.get_by_topic("cs/+/ping", 10).await.len(), 2);
        assert_eq!(log.get_by_topic("cs/orin-01/ping", 10).await.len(), 1);
        let detections = MessageFilter {
            kind: Some(MessageKind::Detections),
            ..MessageFilter::default()
        };
        assert_eq!(log.query(&detections, 10).await.len(), 1);
        assert_eq!(log.get_by_topic("#", 1).await[0].topic, "cs/orin-02/ping");
    }

    #[tokio::test]
    async fn test_query_combines_conditions() {
        let log = MessageLog::default();
        log.add(msg("cs/settings", MessageKind::Settings)).await;
        log.add(msg("cs/orin-01/settings", MessageKind::Misc)).await;
        log.add(msg("larch/detections", MessageKind::Detections)).await;

        let settings_under_cs = MessageFilter {
            topic: Some("cs/#".to_string()),
            kind: Some(MessageKind::Settings),
            after: None,
        };
        let found = log.query(&settings_under_cs, 10).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].topic, "cs/settings");

        let settings_topic_since_start = MessageFilter {
            topic: Some("cs/settings".to_string()),
            after: Some(0),
            ..MessageFilter::default()
        };
        let found = log.query(&settings_topic_since_start, 10).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, MessageKind::Settings);
    }

    #[tokio::test]
    async fn test_cursor_pages_oldest_first_and_clear() {
        let log = MessageLog::default();
        let first = log.add(msg("a", MessageKind::Misc)).await;
        log.add(msg("b", MessageKind::Misc)).await;
        log.add(msg("c", MessageKind::Misc)).await;

        let cursor = MessageFilter {
            after: Some(first.message_id),
            ..MessageFilter::default()
        };
        let newer = log.query(&cursor, 1).await;
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].topic, "b");
        assert_eq!(log.query(&cursor, 10).await.len(), 2);

        assert_eq!(log.clear().await, 3);
        assert_eq!(log.count().await, 0);
    }
}
