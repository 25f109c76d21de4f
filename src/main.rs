//! AGL Studio - fleet configuration and MQTT monitoring service
//!
//! Main entry point.

use aglstudio::{
    config_store::{ConfigStore, FleetRepository},
    device_command::CommandClient,
    host_status_tracker::HostStatusTracker,
    message_log::MessageLog,
    monitor::{subscribe_reply_topics, Monitor},
    mqtt_client::MqttClient,
    realtime_hub::RealtimeHub,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aglstudio=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting AGL Studio v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        fleet_file = %config.fleet_file.display(),
        mqtt_broker = ?config.mqtt_broker_ip,
        mqtt_port = config.mqtt_broker_port,
        command_timeout_ms = config.command_timeout_ms,
        "Configuration loaded"
    );

    let config_store = Arc::new(ConfigStore::new(FleetRepository::new(config.fleet_file.clone())).await?);
    tracing::info!("ConfigStore initialized");

    let mqtt = Arc::new(MqttClient::new());
    let commands = Arc::new(CommandClient::new(mqtt.clone(), config.command_timeout_ms));
    let message_log = Arc::new(MessageLog::new(config.message_log_capacity));
    let host_status = Arc::new(HostStatusTracker::new());
    let realtime = Arc::new(RealtimeHub::new());

    let monitor = Arc::new(Monitor::new(
        mqtt.clone(),
        commands.clone(),
        config_store.clone(),
        message_log.clone(),
        host_status.clone(),
        realtime.clone(),
    ));
    monitor.clone().start();

    let stale = Duration::from_secs(config.ping_stale_sec.max(1));
    monitor.start_sweeper((stale / 2).max(Duration::from_secs(1)), stale);
    tracing::info!(ping_stale_sec = stale.as_secs(), "Monitor started");

    // Broker is optional at startup; it can be connected later through the API
    if let Some(ip) = &config.mqtt_broker_ip {
        match mqtt
            .connect(ip, config.mqtt_broker_port, config.mqtt_subscribe_defaults)
            .await
        {
            Ok(()) => {
                let hosts = config_store.get_cached_hosts().await;
                if let Err(e) = subscribe_reply_topics(&mqtt, &hosts).await {
                    tracing::warn!(error = %e, "Failed to subscribe host reply topics");
                }
            }
            Err(e) => {
                tracing::error!(broker = %ip, error = %e, "MQTT connect failed, starting disconnected");
            }
        }
    } else {
        tracing::info!("MQTT_BROKER_IP not set, starting disconnected");
    }

    let addr = format!("{}:{}", config.host, config.port);

    let state = AppState {
        config,
        config_store,
        mqtt,
        commands,
        message_log,
        host_status,
        realtime,
        started_at: Instant::now(),
    };

    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
