//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config_store::{HostSummary, UpdateCameraRequest, UpdateDetectorRequest, UpdateHostRequest};
use crate::device_command::{CommandId, ItemValue};
use crate::error::Error;
use crate::fleet::{Camera, Detector, Host};
use crate::message_log::MessageFilter;
use crate::models::ApiResponse;
use crate::monitor::{broadcast_host_status, subscribe_reply_topics};
use crate::mqtt_client::{ConnectParams, MessageKind};
use crate::realtime_hub::{CommandResultMessage, HubMessage};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::studio_status))
        // Hosts
        .route("/api/hosts", get(list_hosts).post(create_host))
        .route("/api/hosts/status", get(host_statuses))
        .route(
            "/api/hosts/:host_id",
            get(get_host).put(update_host).delete(delete_host),
        )
        // Cameras
        .route(
            "/api/hosts/:host_id/cameras",
            get(list_cameras).post(create_camera),
        )
        .route(
            "/api/hosts/:host_id/cameras/:camera_id",
            get(get_camera).put(update_camera).delete(delete_camera),
        )
        .route(
            "/api/hosts/:host_id/cameras/:camera_id/stream",
            get(camera_stream),
        )
        // Detectors
        .route(
            "/api/hosts/:host_id/cameras/:camera_id/detectors",
            get(list_detectors).post(create_detector),
        )
        .route(
            "/api/hosts/:host_id/cameras/:camera_id/detectors/:detector_id",
            get(get_detector).put(update_detector).delete(delete_detector),
        )
        // Documents
        .route("/api/documents/import", post(import_document))
        .route(
            "/api/hosts/:host_id/document",
            get(export_document).patch(apply_document_values),
        )
        .route("/api/fleet/restore-backup", post(restore_backup))
        // MQTT
        .route("/api/mqtt/status", get(mqtt_status))
        .route("/api/mqtt/connect", post(mqtt_connect))
        .route("/api/mqtt/reconnect", post(mqtt_reconnect))
        .route("/api/mqtt/disconnect", post(mqtt_disconnect))
        .route("/api/mqtt/subscribe", post(mqtt_subscribe))
        .route("/api/mqtt/unsubscribe-all", post(mqtt_unsubscribe_all))
        // Messages
        .route("/api/messages", get(list_messages).delete(clear_messages))
        // Commands
        .route("/api/hosts/:host_id/commands", post(send_command))
        .route("/api/hosts/:host_id/ping", post(ping_host))
        .route(
            "/api/hosts/:host_id/reported-settings",
            get(get_reported_settings),
        )
        // WebSocket
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
}

// ========================================
// Host Handlers
// ========================================

async fn list_hosts(State(state): State<AppState>) -> impl IntoResponse {
    let hosts = state.config_store.get_cached_hosts().await;
    let summaries: Vec<HostSummary> = hosts.iter().map(HostSummary::from).collect();
    Json(ApiResponse::success(summaries))
}

async fn get_host(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
) -> impl IntoResponse {
    match state.config_store.service().get_host(&host_id).await {
        Ok(Some(host)) => Json(ApiResponse::success(host)).into_response(),
        Ok(None) => Error::NotFound(format!("Host {} not found", host_id)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn create_host(
    State(state): State<AppState>,
    Json(host): Json<Host>,
) -> impl IntoResponse {
    match state.config_store.service().create_host(host).await {
        Ok(host) => {
            refresh_and_listen(&state, std::slice::from_ref(&host)).await;
            (StatusCode::CREATED, Json(ApiResponse::success(host))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn update_host(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
    Json(req): Json<UpdateHostRequest>,
) -> impl IntoResponse {
    match state.config_store.service().update_host(&host_id, req).await {
        Ok(host) => {
            refresh_and_listen(&state, std::slice::from_ref(&host)).await;
            Json(ApiResponse::success(host)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Reload the host cache and listen to the reply topics of `hosts`
///
/// A disconnected broker is not an error; hosts are subscribed again on the
/// next connect.
async fn refresh_and_listen(state: &AppState, hosts: &[Host]) {
    if let Err(e) = state.config_store.refresh_cache().await {
        tracing::warn!(error = %e, "Failed to refresh host cache");
    }
    if let Err(e) = subscribe_reply_topics(&state.mqtt, hosts).await {
        tracing::warn!(hosts = hosts.len(), error = %e, "Failed to subscribe host topics");
    }
}

async fn delete_host(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
) -> impl IntoResponse {
    match state.config_store.service().delete_host(&host_id).await {
        Ok(_) => {
            let _ = state.config_store.refresh_cache().await;
            state.host_status.remove(&host_id).await;
            Json(json!({"ok": true})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn host_statuses(State(state): State<AppState>) -> impl IntoResponse {
    let hosts = state.config_store.get_cached_hosts().await;
    let mut statuses = Vec::with_capacity(hosts.len());
    for host in &hosts {
        statuses.push(state.host_status.get_status(&host.id).await);
    }
    Json(ApiResponse::success(statuses))
}

// ========================================
// Camera Handlers
// ========================================

async fn list_cameras(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
) -> impl IntoResponse {
    match state.config_store.service().list_cameras(&host_id).await {
        Ok(cameras) => Json(ApiResponse::success(cameras)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_camera(
    State(state): State<AppState>,
    Path((host_id, camera_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .get_camera(&host_id, &camera_id)
        .await
    {
        Ok(Some(camera)) => Json(ApiResponse::success(camera)).into_response(),
        Ok(None) => Error::NotFound(format!("Camera {} not found", camera_id)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn create_camera(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
    Json(camera): Json<Camera>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .create_camera(&host_id, camera)
        .await
    {
        Ok(camera) => {
            let _ = state.config_store.refresh_cache().await;
            (StatusCode::CREATED, Json(ApiResponse::success(camera))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn update_camera(
    State(state): State<AppState>,
    Path((host_id, camera_id)): Path<(String, String)>,
    Json(req): Json<UpdateCameraRequest>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .update_camera(&host_id, &camera_id, req)
        .await
    {
        Ok(camera) => {
            let _ = state.config_store.refresh_cache().await;
            Json(ApiResponse::success(camera)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn delete_camera(
    State(state): State<AppState>,
    Path((host_id, camera_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .delete_camera(&host_id, &camera_id)
        .await
    {
        Ok(_) => {
            let _ = state.config_store.refresh_cache().await;
            Json(json!({"ok": true})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    /// Address the host is reachable at; defaults to its broker address
    host_ip: Option<String>,
}

async fn camera_stream(
    State(state): State<AppState>,
    Path((host_id, camera_id)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
) -> crate::Result<Json<ApiResponse<Value>>> {
    let host = state
        .config_store
        .get_cached_host(&host_id)
        .await
        .ok_or_else(|| Error::NotFound(format!("Host {} not found", host_id)))?;
    let camera = host
        .camera(&camera_id)
        .ok_or_else(|| Error::NotFound(format!("Camera {} not found", camera_id)))?;

    let host_ip = query.host_ip.unwrap_or_else(|| host.mqtt_broker_ip.clone());
    let url = camera.stream_url(&host_ip).ok_or_else(|| {
        Error::NotFound(format!("Camera {} has no video stream", camera_id))
    })?;

    Ok(Json(ApiResponse::success(json!({
        "host_id": host_id,
        "camera_id": camera_id,
        "url": url,
        "max_output_fps": camera.video_stream_max_output_fps,
        "has_credentials": !camera.video_stream_login.is_empty(),
    }))))
}

// ========================================
// Detector Handlers
// ========================================

async fn list_detectors(
    State(state): State<AppState>,
    Path((host_id, camera_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .list_detectors(&host_id, &camera_id)
        .await
    {
        Ok(detectors) => Json(ApiResponse::success(detectors)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_detector(
    State(state): State<AppState>,
    Path((host_id, camera_id, detector_id)): Path<(String, String, i32)>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .get_detector(&host_id, &camera_id, detector_id)
        .await
    {
        Ok(Some(detector)) => Json(ApiResponse::success(detector)).into_response(),
        Ok(None) => {
            Error::NotFound(format!("Detector {} not found", detector_id)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn create_detector(
    State(state): State<AppState>,
    Path((host_id, camera_id)): Path<(String, String)>,
    Json(detector): Json<Detector>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .create_detector(&host_id, &camera_id, detector)
        .await
    {
        Ok(detector) => {
            let _ = state.config_store.refresh_cache().await;
            (StatusCode::CREATED, Json(ApiResponse::success(detector))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn update_detector(
    State(state): State<AppState>,
    Path((host_id, camera_id, detector_id)): Path<(String, String, i32)>,
    Json(req): Json<UpdateDetectorRequest>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .update_detector(&host_id, &camera_id, detector_id, req)
        .await
    {
        Ok(detector) => {
            let _ = state.config_store.refresh_cache().await;
            Json(ApiResponse::success(detector)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn delete_detector(
    State(state): State<AppState>,
    Path((host_id, camera_id, detector_id)): Path<(String, String, i32)>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .delete_detector(&host_id, &camera_id, detector_id)
        .await
    {
        Ok(_) => {
            let _ = state.config_store.refresh_cache().await;
            Json(json!({"ok": true})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

// ========================================
// Document Handlers
// ========================================

async fn import_document(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> impl IntoResponse {
    match state.config_store.service().import_document(&document).await {
        Ok((host, replaced)) => {
            refresh_and_listen(&state, std::slice::from_ref(&host)).await;
            let status = if replaced {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (
                status,
                Json(ApiResponse::success(json!({
                    "host": host,
                    "replaced": replaced
                }))),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct DocumentQuery {
    #[serde(default)]
    masked: bool,
}

async fn export_document(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
    Query(query): Query<DocumentQuery>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .export_document(&host_id, query.masked)
        .await
    {
        Ok(document) => Json(document).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ApplyValuesRequest {
    values: Vec<ItemValue>,
}

/// Edit the stored document by path, the way a device applies SetSettings
async fn apply_document_values(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
    Json(req): Json<ApplyValuesRequest>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .apply_values(&host_id, &req.values)
        .await
    {
        Ok((host, applied)) => {
            refresh_and_listen(&state, std::slice::from_ref(&host)).await;
            Json(ApiResponse::success(json!({
                "host": host,
                "applied": applied,
                "requested": req.values.len()
            })))
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn restore_backup(State(state): State<AppState>) -> impl IntoResponse {
    match state.config_store.service().restore_backup().await {
        Ok(hosts) => {
            refresh_and_listen(&state, &hosts).await;
            Json(ApiResponse::success(json!({"hosts": hosts.len()}))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

// ========================================
// MQTT Handlers
// ========================================

async fn mqtt_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.mqtt.status().await))
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    ip: String,
    #[serde(default = "default_broker_port")]
    port: u16,
    #[serde(default = "default_true")]
    is_subscribe: bool,
    login: Option<String>,
    password: Option<String>,
}

fn default_broker_port() -> u16 {
    1883
}

fn default_true() -> bool {
    true
}

async fn mqtt_connect(
    State(state): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> impl IntoResponse {
    if req.ip.trim().is_empty() {
        return Error::Validation("ip is required".to_string()).into_response();
    }

    let mut params = ConnectParams::new(req.ip.trim(), req.port, req.is_subscribe);
    if let Some(login) = req.login.filter(|l| !l.is_empty()) {
        params.credentials = Some((login, req.password.unwrap_or_default()));
    }

    match state.mqtt.connect_with(params).await {
        Ok(()) => {
            after_connect(&state).await;
            Json(ApiResponse::success(state.mqtt.status().await)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn mqtt_reconnect(State(state): State<AppState>) -> impl IntoResponse {
    match state.mqtt.reconnect().await {
        Ok(()) => {
            after_connect(&state).await;
            Json(ApiResponse::success(state.mqtt.status().await)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn after_connect(state: &AppState) {
    let hosts = state.config_store.get_cached_hosts().await;
    if let Err(e) = subscribe_reply_topics(&state.mqtt, &hosts).await {
        tracing::warn!(error = %e, "Failed to subscribe host reply topics");
    }
    state
        .realtime
        .broadcast(HubMessage::MqttConnection(state.mqtt.status().await))
        .await;
}

async fn mqtt_disconnect(State(state): State<AppState>) -> impl IntoResponse {
    let ok = state.mqtt.disconnect().await;
    state
        .realtime
        .broadcast(HubMessage::MqttConnection(state.mqtt.status().await))
        .await;
    Json(json!({"ok": ok}))
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    topic: String,
}

async fn mqtt_subscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscribeRequest>,
) -> impl IntoResponse {
    if req.topic.is_empty() {
        return Error::Validation("topic is required".to_string()).into_response();
    }
    match state.mqtt.subscribe(&req.topic).await {
        Ok(subscribed) => Json(json!({"ok": subscribed, "topic": req.topic})).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn mqtt_unsubscribe_all(State(state): State<AppState>) -> impl IntoResponse {
    match state.mqtt.unsubscribe_all().await {
        Ok(count) => Json(json!({"ok": true, "unsubscribed": count})).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Message Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct MessageQuery {
    limit: Option<usize>,
    /// Topic filter, wildcards allowed
    topic: Option<String>,
    kind: Option<MessageKind>,
    /// Only messages with a larger id; results come oldest first
    after: Option<u64>,
}

async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).min(1000);
    let filter = MessageFilter {
        topic: query.topic,
        kind: query.kind,
        after: query.after,
    };
    let messages = state.message_log.query(&filter, limit).await;

    Json(ApiResponse::success(messages))
}

async fn clear_messages(State(state): State<AppState>) -> impl IntoResponse {
    let removed = state.message_log.clear().await;
    Json(json!({"ok": true, "removed": removed}))
}

// ========================================
// Command Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct CommandRequestBody {
    command_id: CommandId,
    #[serde(default)]
    values: Vec<ItemValue>,
    /// Also write the values into the stored document once the device accepts them
    #[serde(default)]
    apply_locally: bool,
}

async fn send_command(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
    Json(req): Json<CommandRequestBody>,
) -> impl IntoResponse {
    let Some(host) = state.config_store.get_cached_host(&host_id).await else {
        return Error::NotFound(format!("Host {} not found", host_id)).into_response();
    };

    let values = req.values.clone();
    let result = state.commands.send(&host, req.command_id, req.values).await;
    publish_command_result(&state, &host_id, req.command_id, &result).await;

    match result {
        Ok(response) => {
            if req.apply_locally && req.command_id == CommandId::SetSettings {
                match state.config_store.service().apply_values(&host_id, &values).await {
                    Ok(_) => {
                        let _ = state.config_store.refresh_cache().await;
                    }
                    Err(e) => {
                        tracing::warn!(host_id = %host_id, error = %e, "Device accepted values but local apply failed");
                    }
                }
            }
            Json(ApiResponse::success(response)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn ping_host(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
) -> impl IntoResponse {
    let Some(host) = state.config_store.get_cached_host(&host_id).await else {
        return Error::NotFound(format!("Host {} not found", host_id)).into_response();
    };

    let started = std::time::Instant::now();
    let result = state.commands.ping(&host).await;
    publish_command_result(&state, &host_id, CommandId::Ping, &result).await;

    match result {
        Ok(response) => {
            host_replied(&state, &host_id).await;
            Json(ApiResponse::success(json!({
                "response": response,
                "round_trip_ms": started.elapsed().as_millis() as u64
            })))
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Record a direct reply from a host, pushing any liveness transition
async fn host_replied(state: &AppState, host_id: &str) {
    if let Some(event) = state.host_status.mark_seen(host_id).await {
        broadcast_host_status(&state.realtime, host_id, event).await;
    }
}

async fn publish_command_result(
    state: &AppState,
    host_id: &str,
    command_id: CommandId,
    result: &crate::Result<crate::device_command::CommandResponse>,
) {
    let message = CommandResultMessage {
        host_id: host_id.to_string(),
        command_id: i32::from(command_id),
        ok: result.is_ok(),
        response: result.as_ref().ok().cloned(),
        error: result.as_ref().err().map(|e| e.to_string()),
    };
    state
        .realtime
        .broadcast(HubMessage::CommandResult(message))
        .await;
}

async fn get_reported_settings(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
) -> impl IntoResponse {
    match state.commands.reported_settings(&host_id).await {
        Some(reported) => Json(ApiResponse::success(reported)).into_response(),
        None => Error::NotFound(format!("No settings reported by host {}", host_id))
            .into_response(),
    }
}

// ========================================
// WebSocket Handler
// ========================================

#[derive(Debug, Deserialize)]
struct WsQuery {
    /// Forward only MQTT messages matching this topic filter
    topic: Option<String>,
}

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, query.topic))
}

/// Handle WebSocket connection
///
/// A text frame from the client replaces its topic filter (empty clears it).
async fn handle_websocket(socket: WebSocket, state: AppState, topic: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut rx) = state.realtime.register(topic).await;

    // Forward hub messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let realtime = state.realtime.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let filter = Some(text.trim().to_string()).filter(|t| !t.is_empty());
                    tracing::debug!(connection_id = %conn_id, filter = ?filter, "Topic filter changed");
                    realtime.set_topic_filter(&conn_id, filter).await;
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
        conn_id
    });

    let conn_id = tokio::select! {
        _ = send_task => conn_id,
        result = recv_task => result.unwrap_or(conn_id),
    };

    state.realtime.unregister(&conn_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::{ConfigStore, FleetRepository};
    use crate::device_command::{CommandClient, DEFAULT_COMMAND_TIMEOUT_MS};
    use crate::host_status_tracker::{HostConnectionStatus, HostStatusTracker};
    use crate::message_log::MessageLog;
    use crate::mqtt_client::{test_broker, MqttClient};
    use crate::realtime_hub::RealtimeHub;
    use crate::state::AppConfig;
    use std::sync::Arc;
    use std::time::Instant;

    async fn app_state(dir: &tempfile::TempDir) -> AppState {
        let config_store = Arc::new(
            ConfigStore::new(FleetRepository::new(dir.path().join("fleet.json")))
                .await
                .unwrap(),
        );
        let mqtt = Arc::new(MqttClient::new());
        AppState {
            config: AppConfig::default(),
            config_store,
            commands: Arc::new(CommandClient::new(mqtt.clone(), DEFAULT_COMMAND_TIMEOUT_MS)),
            mqtt,
            message_log: Arc::new(MessageLog::default()),
            host_status: Arc::new(HostStatusTracker::new()),
            realtime: Arc::new(RealtimeHub::new()),
            started_at: Instant::now(),
        }
    }

    async fn connected_state(dir: &tempfile::TempDir) -> AppState {
        let broker = test_broker::spawn().await;
        let state = app_state(dir).await;
        state.mqtt.connect("127.0.0.1", broker.port, false).await.unwrap();
        state
    }

    fn host(id: &str) -> Host {
        Host {
            id: id.to_string(),
            is_create_backup: true,
            mqtt_response_topic: format!("cs/{}/response", id),
            mqtt_ping_topic: format!("cs/{}/ping", id),
            mqtt_settings_get_topic: format!("cs/{}/settings", id),
            ..Host::default()
        }
    }

    async fn subscribed(state: &AppState) -> Vec<String> {
        state.mqtt.status().await.misc_topics
    }

    #[tokio::test]
    async fn test_import_document_listens_to_new_host() {
        let dir = tempfile::tempdir().unwrap();
        let state = connected_state(&dir).await;

        let document = json!({
            "config_version_high": 1,
            "config_version_low": 10,
            "settings": {
                "id": "orin-07",
                "mqtt_response_topic": "cs/orin-07/response",
                "mqtt_ping_topic": "cs/orin-07/ping",
                "mqtt_settings_get_topic": "cs/orin-07/settings",
                "cameras": []
            }
        });
        let response = import_document(State(state.clone()), Json(document))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let topics = subscribed(&state).await;
        assert!(topics.contains(&"cs/orin-07/ping".to_string()));
        assert!(topics.contains(&"cs/orin-07/settings".to_string()));
        assert!(state.config_store.get_cached_host("orin-07").await.is_some());
    }

    #[tokio::test]
    async fn test_restore_backup_listens_to_restored_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let state = connected_state(&dir).await;
        let service = state.config_store.service();
        service.create_host(host("orin-01")).await.unwrap();
        // the second save backs up the fleet holding only orin-01
        service.create_host(host("orin-02")).await.unwrap();
        assert!(subscribed(&state).await.is_empty());

        let response = restore_backup(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let topics = subscribed(&state).await;
        assert!(topics.contains(&"cs/orin-01/response".to_string()));
        assert!(!topics.iter().any(|t| t.contains("orin-02")));
        assert!(state.config_store.get_cached_host("orin-02").await.is_none());
    }

    #[tokio::test]
    async fn test_apply_document_values_keeps_listening() {
        let dir = tempfile::tempdir().unwrap();
        let state = connected_state(&dir).await;
        state.config_store.service().create_host(host("orin-01")).await.unwrap();

        let req = ApplyValuesRequest {
            values: vec![ItemValue::new("settings/mqtt_ping_topic", json!("cs/line1/ping"))],
        };
        let response = apply_document_values(State(state.clone()), Path("orin-01".to_string()), Json(req))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(subscribed(&state).await.contains(&"cs/line1/ping".to_string()));
    }

    #[tokio::test]
    async fn test_host_reply_broadcasts_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(&dir).await;
        let (_id, mut rx) = state.realtime.register(None).await;

        state.host_status.update_status("orin-01", false).await;
        host_replied(&state, "orin-01").await;

        let pushed: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["type"], "host_status");
        assert_eq!(pushed["data"]["host_id"], "orin-01");
        assert_eq!(
            state.host_status.get_status("orin-01").await.status,
            HostConnectionStatus::Online
        );

        // already online: nothing further is pushed
        host_replied(&state, "orin-01").await;
        assert!(rx.try_recv().is_err());
    }
}
