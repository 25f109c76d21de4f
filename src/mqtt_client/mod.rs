//! MqttClient - Broker Connection Façade
//!
//! ## Responsibilities
//!
//! - Single broker connection (fresh UUID client id per connect)
//! - Default topic subscriptions (detections / settings / command)
//! - Ad-hoc "misc" subscriptions added and dropped at runtime
//! - Routing every received publish to a typed kind and broadcasting it
//!
//! Subscriptions use QoS 0 (at most once). Received messages are delivered
//! through a `tokio::sync::broadcast` channel; slow receivers lose the oldest
//! messages rather than stalling the event loop.

#[cfg(test)]
pub(crate) mod test_broker;
mod topics;
mod types;

pub use topics::topic_matches;
pub use types::*;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Broadcast buffer for received messages
const MESSAGE_CHANNEL_CAPACITY: usize = 1024;
/// Request queue between client handle and event loop
const REQUEST_CHANNEL_CAPACITY: usize = 64;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
/// Pause before the event loop retries after a connection error
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Broker connection parameters, remembered for `reconnect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub ip: String,
    pub port: u16,
    pub is_subscribe: bool,
    pub credentials: Option<(String, String)>,
}

impl ConnectParams {
    pub fn new(ip: impl Into<String>, port: u16, is_subscribe: bool) -> Self {
        Self {
            ip: ip.into(),
            port,
            is_subscribe,
            credentials: None,
        }
    }
}

/// Routes received publishes to the message channel
#[derive(Clone)]
struct Dispatcher {
    topics: DefaultTopics,
    tx: broadcast::Sender<MqttMessage>,
}

impl Dispatcher {
    fn dispatch(&self, topic: &str, payload: &[u8]) -> MqttMessage {
        let kind = self.topics.classify(topic);
        let message = MqttMessage::new(topic, kind, payload);

        tracing::trace!(topic = %topic, kind = ?kind, bytes = payload.len(), "MQTT message received");

        if self.tx.send(message.clone()).is_err() {
            tracing::trace!(topic = %topic, "No message receivers");
        }
        message
    }
}

struct Connection {
    client: AsyncClient,
    task: JoinHandle<()>,
}

/// MqttClient instance
pub struct MqttClient {
    dispatcher: Dispatcher,
    connection: RwLock<Option<Connection>>,
    /// Held for the whole of connect and disconnect
    session: Mutex<()>,
    connected: Arc<AtomicBool>,
    params: RwLock<Option<ConnectParams>>,
    defaults_subscribed: AtomicBool,
    misc_topics: Arc<RwLock<Vec<String>>>,
}

impl MqttClient {
    /// Create new MqttClient with the standard default topics
    pub fn new() -> Self {
        Self::with_topics(DefaultTopics::default())
    }

    /// Create new MqttClient with custom default topics
    pub fn with_topics(topics: DefaultTopics) -> Self {
        let (tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        Self {
            dispatcher: Dispatcher { topics, tx },
            connection: RwLock::new(None),
            session: Mutex::new(()),
            connected: Arc::new(AtomicBool::new(false)),
            params: RwLock::new(None),
            defaults_subscribed: AtomicBool::new(false),
            misc_topics: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Receive every publish from now on
    pub fn subscribe_messages(&self) -> broadcast::Receiver<MqttMessage> {
        self.dispatcher.tx.subscribe()
    }

    /// Connect and subscribe to the default topics
    pub async fn connect_default(&self, ip: &str, port: u16) -> Result<()> {
        self.connect(ip, port, true).await
    }

    /// Connect to `ip:port`, subscribing to the default topics when `is_subscribe`
    pub async fn connect(&self, ip: &str, port: u16, is_subscribe: bool) -> Result<()> {
        self.connect_with(ConnectParams::new(ip, port, is_subscribe))
            .await
    }

    /// Connect with full parameters
    ///
    /// An existing connection is dropped first. Returns once the broker has
    /// acknowledged the session. Concurrent calls run one after another.
    pub async fn connect_with(&self, params: ConnectParams) -> Result<()> {
        let _session = self.session.lock().await;

        *self.params.write().await = Some(params.clone());
        self.drop_connection().await;

        let client_id = Uuid::new_v4().to_string();
        let mut options = MqttOptions::new(client_id.clone(), params.ip.clone(), params.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if let Some((login, password)) = &params.credentials {
            options.set_credentials(login.clone(), password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        match timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(broker = %params.ip, port = params.port, error = %e, "MQTT connect failed");
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(broker = %params.ip, port = params.port, "MQTT connect timed out");
                return Err(Error::Timeout(format!(
                    "no CONNACK from {}:{}",
                    params.ip, params.port
                )));
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            broker = %params.ip,
            port = params.port,
            client_id = %client_id,
            "MQTT connected"
        );

        let resubscribe = if params.is_subscribe {
            self.dispatcher
                .topics
                .all()
                .iter()
                .map(|t| t.to_string())
                .collect()
        } else {
            Vec::new()
        };

        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            self.dispatcher.clone(),
            self.connected.clone(),
            resubscribe,
            self.misc_topics.clone(),
        ));

        if params.is_subscribe {
            for topic in self.dispatcher.topics.all() {
                client.subscribe(topic, QoS::AtMostOnce).await?;
                tracing::debug!(topic = %topic, "Subscribed to default topic");
            }
        }
        self.defaults_subscribed
            .store(params.is_subscribe, Ordering::SeqCst);

        if let Some(stale) = self
            .connection
            .write()
            .await
            .replace(Connection { client, task })
        {
            stale.task.abort();
        }
        Ok(())
    }

    /// Reconnect with the parameters of the last `connect`
    pub async fn reconnect(&self) -> Result<()> {
        let params = self
            .params
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Config("no previous MQTT connection".to_string()))?;
        self.connect_with(params).await
    }

    /// Whether the broker currently acknowledges the session
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Subscribe to an additional topic
    ///
    /// Returns `false` without subscribing when not connected.
    pub async fn subscribe(&self, topic: &str) -> Result<bool> {
        if !self.is_connected() {
            return Ok(false);
        }
        let Some(client) = self.client().await else {
            return Ok(false);
        };

        client.subscribe(topic, QoS::AtMostOnce).await?;

        let mut misc = self.misc_topics.write().await;
        if !misc.iter().any(|t| t == topic) {
            misc.push(topic.to_string());
        }
        tracing::info!(topic = %topic, "Subscribed to misc topic");
        Ok(true)
    }

    /// Subscribe unless the topic is already a misc subscription
    pub async fn ensure_subscribed(&self, topic: &str) -> Result<bool> {
        if self.is_connected() && self.misc_topics.read().await.iter().any(|t| t == topic) {
            return Ok(true);
        }
        self.subscribe(topic).await
    }

    /// Drop every misc subscription
    ///
    /// Returns the number of topics removed from the list.
    pub async fn unsubscribe_all(&self) -> Result<usize> {
        let topics: Vec<String> = self.misc_topics.write().await.drain(..).collect();

        if self.is_connected() {
            if let Some(client) = self.client().await {
                for topic in &topics {
                    client.unsubscribe(topic.clone()).await?;
                }
            }
        }

        tracing::info!(count = topics.len(), "Unsubscribed misc topics");
        Ok(topics.len())
    }

    /// Unsubscribe default topics and close the session
    ///
    /// Always succeeds; a missing connection is not an error.
    pub async fn disconnect(&self) -> bool {
        let _session = self.session.lock().await;

        if self.is_connected() {
            if let Some(client) = self.client().await {
                if self.defaults_subscribed.load(Ordering::SeqCst) {
                    for topic in self.dispatcher.topics.all() {
                        if let Err(e) = client.unsubscribe(topic).await {
                            tracing::warn!(topic = %topic, error = %e, "Unsubscribe failed");
                        }
                    }
                }
                if let Err(e) = client.disconnect().await {
                    tracing::warn!(error = %e, "MQTT disconnect request failed");
                }
            }
            // let the event loop flush the DISCONNECT before it is aborted
            if let Some(conn) = self.connection.write().await.as_mut() {
                let _ = timeout(DISCONNECT_GRACE, &mut conn.task).await;
            }
            tracing::info!("MQTT disconnected");
        }

        self.drop_connection().await;
        true
    }

    /// Publish at QoS 0
    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Mqtt("not connected".to_string()));
        }
        let client = self
            .client()
            .await
            .ok_or_else(|| Error::Mqtt("not connected".to_string()))?;

        client
            .publish(topic, QoS::AtMostOnce, false, payload.into())
            .await?;
        tracing::debug!(topic = %topic, "MQTT message published");
        Ok(())
    }

    /// Current connection snapshot
    pub async fn status(&self) -> MqttStatus {
        let params = self.params.read().await.clone();
        MqttStatus {
            connected: self.is_connected(),
            broker_ip: params.as_ref().map(|p| p.ip.clone()),
            broker_port: params.as_ref().map(|p| p.port),
            default_topics_subscribed: self.is_connected()
                && self.defaults_subscribed.load(Ordering::SeqCst),
            misc_topics: self.misc_topics.read().await.clone(),
        }
    }

    async fn client(&self) -> Option<AsyncClient> {
        self.connection
            .read()
            .await
            .as_ref()
            .map(|c| c.client.clone())
    }

    async fn drop_connection(&self) {
        if let Some(conn) = self.connection.write().await.take() {
            conn.task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        self.defaults_subscribed.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, topic: &str, payload: &[u8]) -> MqttMessage {
        self.dispatcher.dispatch(topic, payload)
    }
}

impl Default for MqttClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(Error::Mqtt(format!("connection refused: {:?}", ack.code)))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(Error::Mqtt(e.to_string())),
        }
    }
}

/// Drive the connection until it is closed by `disconnect`
///
/// The transport reconnects on the next poll after an error; since sessions
/// are clean, subscriptions are re-issued on every new CONNACK.
async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    dispatcher: Dispatcher,
    connected: Arc<AtomicBool>,
    default_topics: Vec<String>,
    misc_topics: Arc<RwLock<Vec<String>>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                dispatcher.dispatch(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    tracing::warn!(code = ?ack.code, "MQTT reconnect refused");
                    continue;
                }
                connected.store(true, Ordering::SeqCst);
                tracing::info!("MQTT connection re-established");

                let misc = misc_topics.read().await.clone();
                for topic in default_topics.iter().chain(misc.iter()) {
                    if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                        tracing::warn!(topic = %topic, error = %e, "Resubscribe failed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                tracing::warn!("Broker closed the MQTT session");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    tracing::warn!(error = %e, "MQTT connection lost");
                } else {
                    tracing::debug!(error = %e, "MQTT reconnect attempt failed");
                }
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
    tracing::debug!("MQTT event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_without_connection() {
        let client = MqttClient::new();
        assert!(!client.is_connected());
        assert!(!client.subscribe("kuka/data").await.unwrap());
        assert_eq!(client.unsubscribe_all().await.unwrap(), 0);
        assert!(client.disconnect().await);
        assert!(matches!(client.publish("x", "y").await, Err(Error::Mqtt(_))));
        assert!(matches!(client.reconnect().await, Err(Error::Config(_))));

        let status = client.status().await;
        assert!(!status.connected);
        assert!(status.broker_ip.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_routes_and_broadcasts() {
        let client = MqttClient::new();
        let mut rx = client.subscribe_messages();

        client.inject("cs/settings", b"{}");
        client.inject("kuka/data", b"42");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, MessageKind::Settings);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, MessageKind::Misc);
        assert_eq!(second.topic, "kuka/data");
        assert_eq!(second.payload, "42");
    }

    #[tokio::test]
    async fn test_dispatch_without_receivers_is_silent() {
        let client = MqttClient::with_topics(DefaultTopics {
            detections: "larch/#".to_string(),
            ..DefaultTopics::default()
        });
        let msg = client.inject("larch/detections/cam0", b"[]");
        assert_eq!(msg.kind, MessageKind::Detections);
    }

    #[tokio::test]
    async fn test_connect_refused_reports_error() {
        let client = MqttClient::new();
        // nothing listens on port 1 on the loopback interface
        let result = client.connect("127.0.0.1", 1, true).await;
        assert!(result.is_err());
        assert!(!client.is_connected());
        assert_eq!(client.status().await.broker_port, Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_connects_leave_one_session() {
        let broker = test_broker::spawn().await;
        let client = MqttClient::new();

        let (a, b) = tokio::join!(
            client.connect("127.0.0.1", broker.port, false),
            client.connect("127.0.0.1", broker.port, false)
        );
        assert!(a.is_ok() && b.is_ok());
        assert!(client.is_connected());
        assert_eq!(broker.opened(), 2);

        // the first session is closed as soon as the second replaces it
        let replaced = timeout(Duration::from_secs(5), async {
            while broker.closed() < 1 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(replaced.is_ok());

        assert!(client.disconnect().await);
        let all_closed = timeout(Duration::from_secs(5), async {
            while broker.closed() < 2 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(all_closed.is_ok());
        assert!(!client.is_connected());
    }
}
