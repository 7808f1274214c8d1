use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use iris_core::ids::ConnectionId;
use iris_core::HubError;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::hub::HubEvent;

/// Per-connection transport settings.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionConfig {
    pub heartbeat_interval: Duration,
    /// A peer silent for longer than this is disconnected.
    pub client_timeout: Duration,
    pub max_send_queue: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            max_send_queue: 256,
        }
    }
}

/// Last time anything arrived from the peer, in millis since `origin`.
struct Liveness {
    origin: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_seen_ms.store(elapsed, Ordering::Relaxed);
    }

    fn silent_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// Text carried by a data frame. Binary frames must hold UTF-8.
fn frame_text(msg: WsMessage) -> Result<Option<String>, HubError> {
    match msg {
        WsMessage::Text(text) => Ok(Some(text.to_string())),
        WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| HubError::Transport("binary frame is not UTF-8".into())),
        _ => Ok(None),
    }
}

/// Drive one WebSocket: register with the hub, pump frames both ways with a
/// heartbeat, and report the disconnect when either side ends.
pub async fn handle_ws_connection(
    socket: WebSocket,
    events: mpsc::Sender<HubEvent>,
    config: ConnectionConfig,
) {
    let id = ConnectionId::new();
    let span = tracing::info_span!("connection", conn_id = %id);
    let (tx, mut rx) = mpsc::channel::<String>(config.max_send_queue);
    if events
        .send(HubEvent::Connected { id: id.clone(), tx })
        .await
        .is_err()
    {
        span.in_scope(|| tracing::warn!("hub stopped, rejecting connection"));
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let liveness = Arc::new(Liveness::new());

    // Writer task: forward queued frames to the socket + periodic ping
    let writer_liveness = Arc::clone(&liveness);
    let writer_task = async move {
        let mut ping_interval = tokio::time::interval(config.heartbeat_interval);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if writer_liveness.silent_for() > config.client_timeout {
                        tracing::info!("peer timed out");
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                    if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    tracing::trace!("sent ping");
                }
            }
        }
    };
    let mut writer = tokio::spawn(writer_task.instrument(span.clone()));

    // Reader task: hand frames to the hub, track liveness
    let reader_id = id.clone();
    let reader_events = events.clone();
    let reader_task = async move {
        while let Some(next) = ws_rx.next().await {
            let msg = match next {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::debug!(error = %err, "read failed");
                    break;
                }
            };
            liveness.touch();
            if matches!(msg, WsMessage::Close(_)) {
                break;
            }
            match frame_text(msg) {
                Ok(Some(text)) => {
                    let frame = HubEvent::Frame {
                        id: reader_id.clone(),
                        text,
                    };
                    if reader_events.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "closing connection");
                    break;
                }
            }
        }
    };
    let mut reader = tokio::spawn(reader_task.instrument(span));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    let _ = events.send(HubEvent::Disconnected { id }).await;
}
