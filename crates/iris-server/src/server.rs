use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use iris_settings::IrisSettings;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api_bridge::{ApiBridge, ApiConfig, BridgeError, HttpApiBridge};
use crate::connection::{self, ConnectionConfig};
use crate::hub::{Hub, HubConfig, HubEvent, HubSnapshot};

const EVENT_QUEUE: usize = 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub connection: ConnectionConfig,
    pub hub: HubConfig,
    /// External API for remote commands. `None` disables the bridge.
    pub api: Option<ApiConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8045,
            connection: ConnectionConfig::default(),
            hub: HubConfig::default(),
            api: None,
        }
    }
}

impl From<&IrisSettings> for ServerConfig {
    fn from(settings: &IrisSettings) -> Self {
        let multipart = &settings.multipart;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            connection: ConnectionConfig {
                heartbeat_interval: Duration::from_secs(settings.server.heartbeat_interval_secs),
                client_timeout: Duration::from_secs(settings.server.client_timeout_secs),
                max_send_queue: settings.server.max_send_queue,
            },
            hub: HubConfig {
                max_frame_size: multipart.max_frame_size,
                max_packet_count: multipart.max_packet_count,
                fragment_ttl: (multipart.fragment_ttl_secs > 0)
                    .then(|| Duration::from_secs(multipart.fragment_ttl_secs)),
                sweep_interval: Duration::from_secs(multipart.sweep_interval_secs.max(1)),
                log_frames: settings.logging.log_frames,
            },
            api: settings.api.url.clone().map(|url| ApiConfig {
                url,
                timeout: Duration::from_secs(settings.api.timeout_secs),
                accept_invalid_certs: settings.api.accept_invalid_certs,
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
    #[error("failed to set up api bridge: {0}")]
    Bridge(#[from] BridgeError),
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub events: mpsc::Sender<HubEvent>,
    pub connection: ConnectionConfig,
    pub started_at: Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the hub and listener, with an HTTP bridge when `config.api` is set.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, ServerError> {
    let bridge = match &config.api {
        Some(api) => {
            tracing::info!(url = %api.url, "api bridge enabled");
            Some(Arc::new(HttpApiBridge::new(api)?) as Arc<dyn ApiBridge>)
        }
        None => {
            tracing::info!("api bridge disabled, remote commands will be dropped");
            None
        }
    };
    start_with_bridge(config, bridge).await
}

/// Start with an explicit bridge.
pub async fn start_with_bridge(
    config: ServerConfig,
    bridge: Option<Arc<dyn ApiBridge>>,
) -> Result<ServerHandle, ServerError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel::<HubEvent>(EVENT_QUEUE);

    let hub = Hub::new(config.hub.clone(), bridge, event_tx.clone());
    let hub_task = tokio::spawn(hub.run(event_rx, shutdown.clone()));

    let state = AppState {
        events: event_tx,
        connection: config.connection,
        started_at: Instant::now(),
    };
    let router = build_router(state);

    tracing::info!(addr = %local_addr, "Iris hub listening");

    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        hub: hub_task,
        server: server_task,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    hub: JoinHandle<()>,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections, stop the hub, and wait briefly for both.
    ///
    /// Stopping the hub drops every outbound queue, which ends the open
    /// WebSocket sessions.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for (name, mut task) in [("hub", self.hub), ("server", self.server)] {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!(task = name, "did not stop in time, aborting");
                task.abort();
            }
        }
        tracing::info!("Iris hub stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    connection::handle_ws_connection(socket, state.events, state.connection).await;
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    #[serde(flatten)]
    hub: HubSnapshot,
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (reply, answer) = oneshot::channel();
    let snapshot = match state.events.send(HubEvent::Snapshot(reply)).await {
        Ok(()) => answer.await.ok(),
        Err(_) => None,
    };
    let uptime_secs = state.started_at.elapsed().as_secs();

    match snapshot {
        Some(hub) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                uptime_secs,
                hub,
            }),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
                uptime_secs,
                hub: HubSnapshot::default(),
            }),
        ),
    }
}
