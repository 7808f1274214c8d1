//! The dispatcher actor.
//!
//! One `Hub` owns the connection registry, the multipart assembler and the
//! line cache. Transport tasks and API calls talk to it only through
//! [`HubEvent`]s on a single queue, so every mutation and every lookup happens
//! in arrival order on one task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use iris_core::ids::ConnectionId;
use iris_core::message::{ACTIVE_USERS, LINES_LIST, PONG, SHOW_FORM};
use iris_core::multipart::{self, Assembly, MultipartAssembler};
use iris_core::{HubError, Inbound, LineRegistry, LogicalMessage, Recipient};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::api_bridge::{ApiBridge, ApiResponse, BridgeError};
use crate::handshake;
use crate::registry::ConnectionRegistry;

/// Everything the hub reacts to.
#[derive(Debug)]
pub enum HubEvent {
    Connected {
        id: ConnectionId,
        tx: mpsc::Sender<String>,
    },
    Frame {
        id: ConnectionId,
        text: String,
    },
    Disconnected {
        id: ConnectionId,
    },
    ApiCompleted {
        origin: ConnectionId,
        request_type: String,
        result: Result<ApiResponse, BridgeError>,
    },
    Snapshot(oneshot::Sender<HubSnapshot>),
}

/// Point-in-time counters for `/health`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HubSnapshot {
    pub connections: usize,
    pub operators: usize,
    pub gateway_connected: bool,
    pub lines: usize,
    pub pending_fragments: usize,
}

/// Dispatch tuning.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Outbound frames larger than this are split into `multipart`.
    pub max_frame_size: usize,
    /// Largest `packetcount` accepted inbound.
    pub max_packet_count: usize,
    /// Partial messages older than this are dropped. `None` keeps them.
    pub fragment_ttl: Option<Duration>,
    pub sweep_interval: Duration,
    /// Log every inbound frame at debug level.
    pub log_frames: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 65_536,
            max_packet_count: 4096,
            fragment_ttl: Some(Duration::from_secs(300)),
            sweep_interval: Duration::from_secs(30),
            log_frames: false,
        }
    }
}

pub struct Hub {
    config: HubConfig,
    registry: ConnectionRegistry,
    assembler: MultipartAssembler,
    lines: LineRegistry,
    bridge: Option<Arc<dyn ApiBridge>>,
    events: mpsc::Sender<HubEvent>,
}

impl Hub {
    /// `events` is the sending half of the hub's own queue; API results come
    /// back through it.
    pub fn new(
        config: HubConfig,
        bridge: Option<Arc<dyn ApiBridge>>,
        events: mpsc::Sender<HubEvent>,
    ) -> Self {
        Self {
            assembler: MultipartAssembler::new(config.max_packet_count),
            config,
            registry: ConnectionRegistry::new(),
            lines: LineRegistry::new(),
            bridge,
            events,
        }
    }

    /// Process events until cancelled.
    pub async fn run(mut self, mut rx: mpsc::Receiver<HubEvent>, shutdown: CancellationToken) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
                _ = sweep.tick() => self.sweep(Instant::now()),
                () = shutdown.cancelled() => break,
            }
        }
        tracing::info!(connections = self.registry.count(), "hub stopped");
    }

    pub fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connected { id, tx } => self.on_connect(id, tx),
            HubEvent::Frame { id, text } => self.on_frame(&id, &text),
            HubEvent::Disconnected { id } => self.on_disconnect(&id),
            HubEvent::ApiCompleted {
                origin,
                request_type,
                result,
            } => self.on_api_completed(&origin, &request_type, result),
            HubEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn on_connect(&mut self, id: ConnectionId, tx: mpsc::Sender<String>) {
        tracing::info!(conn_id = %id, "connection opened");
        self.registry.register(id.clone(), tx);
        self.registry.send_to(&id, handshake::greeting().to_wire());
    }

    fn on_disconnect(&mut self, id: &ConnectionId) {
        let was_gateway = self.registry.gateway() == Some(id);
        let Some(conn) = self.registry.unregister(id) else {
            return;
        };
        let dropped = self.assembler.discard_connection(id);
        if was_gateway {
            tracing::warn!(conn_id = %id, "gateway disconnected");
        }
        tracing::info!(
            conn_id = %id,
            role = %conn.role,
            dropped_fragments = dropped,
            "connection closed"
        );
    }

    fn on_frame(&mut self, from: &ConnectionId, text: &str) {
        let span = tracing::info_span!(
            "frame",
            conn_id = %from,
            message_type = tracing::field::Empty
        );
        let _enter = span.enter();
        if self.config.log_frames {
            tracing::debug!(conn_id = %from, frame = %text, "frame received");
        }
        let message = match LogicalMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(conn_id = %from, error = %err, "unparsable frame dropped");
                return;
            }
        };
        let message_type = message.message_type.clone();
        span.record("message_type", message_type.as_str());
        if let Err(err) = self.dispatch(from, message) {
            log_dispatch_error(from, &message_type, &err);
        }
    }

    /// Route one logical message from `from`.
    pub fn dispatch(&mut self, from: &ConnectionId, message: LogicalMessage) -> Result<(), HubError> {
        let inbound = Inbound::classify(message)?;
        tracing::trace!(conn_id = %from, action = inbound.action(), "dispatch");

        match inbound {
            Inbound::ToGateway(message) => {
                self.registry.send_to_gateway(message.to_wire())?;
            }
            Inbound::ToOperator { recipient, message } => {
                self.deliver_to_operator(&recipient, &message);
            }
            Inbound::Greeting {
                qid,
                identification,
            } => {
                self.registry.send_to(from, handshake::iam_reply(qid).to_wire());
                handshake::identify(&mut self.registry, from, identification?)?;
            }
            Inbound::Identify(identification) => {
                handshake::identify(&mut self.registry, from, identification)?;
            }
            Inbound::LineSync(records) => {
                let applied = self.lines.apply_full_sync(records);
                tracing::info!(conn_id = %from, applied, total = self.lines.len(), "line list synced");
            }
            Inbound::LineStateChanged { updates, message } => {
                let applied = self.lines.apply_state_change(&updates);
                let reached = self.registry.broadcast_to_operators(&message.to_wire());
                tracing::debug!(applied, reached, "line state broadcast");
            }
            Inbound::ListActiveUsers { qid } => {
                let reply = LogicalMessage::with_payload(
                    ACTIVE_USERS,
                    json!({ "qid": qid, "users": self.registry.active_users() }),
                );
                self.registry.send_to_gateway(reply.to_wire())?;
            }
            Inbound::ListLines {
                user_id,
                user_login,
            } => {
                if self.lines.is_empty() {
                    tracing::debug!(conn_id = %from, "line list requested before first sync");
                    if self.registry.gateway().is_some() {
                        self.registry
                            .send_to_gateway(handshake::full_sync_request().to_wire())?;
                    }
                    return Ok(());
                }
                let reply = LogicalMessage::with_payload(
                    LINES_LIST,
                    json!({
                        "userid": user_id,
                        "userlogin": user_login,
                        "numbers": self.lines.list(),
                    }),
                );
                self.registry.send_to(from, reply.to_wire());
            }
            Inbound::Ping(message) => {
                self.registry.send_to(from, message.retyped(PONG).to_wire());
            }
            Inbound::RemoteCommand(message) => self.start_api_call(from, message),
            Inbound::Fragment(fragment) => {
                if let Assembly::Complete(bytes) = self.assembler.accept(from, fragment)? {
                    let message = LogicalMessage::from_slice(&bytes)?;
                    tracing::debug!(
                        conn_id = %from,
                        message_type = %message.message_type,
                        bytes = bytes.len(),
                        "multipart message reassembled"
                    );
                    self.dispatch(from, message)?;
                }
            }
            Inbound::Unrecognized(message_type) => {
                tracing::debug!(conn_id = %from, message_type = %message_type, "unrecognized message dropped");
            }
        }
        Ok(())
    }

    fn deliver_to_operator(&self, recipient: &Recipient, message: &LogicalMessage) {
        match self.registry.find_operator(recipient) {
            Some(target) => {
                self.registry.send_to(target, message.to_wire());
            }
            None => tracing::debug!(
                message_type = %message.message_type,
                user_id = ?recipient.user_id,
                user_login = ?recipient.user_login,
                "no operator matches, message dropped"
            ),
        }
    }

    fn start_api_call(&self, origin: &ConnectionId, message: LogicalMessage) {
        let Some(bridge) = self.bridge.clone() else {
            tracing::debug!(
                conn_id = %origin,
                message_type = %message.message_type,
                "api bridge disabled, remote command dropped"
            );
            return;
        };
        let events = self.events.clone();
        let origin = origin.clone();
        let _ = tokio::spawn(async move {
            let result = bridge.execute(&message).await;
            let _ = events
                .send(HubEvent::ApiCompleted {
                    origin,
                    request_type: message.message_type,
                    result,
                })
                .await;
        });
    }

    fn on_api_completed(
        &mut self,
        origin: &ConnectionId,
        request_type: &str,
        result: Result<ApiResponse, BridgeError>,
    ) {
        let message = match result.and_then(ApiResponse::into_message) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(
                    conn_id = %origin,
                    message_type = %request_type,
                    error_kind = err.error_kind(),
                    error = %err,
                    "api call failed"
                );
                return;
            }
        };

        if message.message_type == SHOW_FORM {
            match Recipient::from_payload(&message.payload) {
                Ok(recipient) => self.deliver_to_operator(&recipient, &message),
                Err(err) => log_dispatch_error(origin, SHOW_FORM, &err),
            }
            return;
        }

        let frames = multipart::fragment(&message.to_wire(), self.config.max_frame_size);
        let count = frames.len();
        for frame in frames {
            if let Err(err) = self.registry.send_to_gateway(frame) {
                log_dispatch_error(origin, &message.message_type, &err);
                return;
            }
        }
        tracing::debug!(
            conn_id = %origin,
            message_type = %message.message_type,
            frames = count,
            "api result sent to gateway"
        );
    }

    fn sweep(&mut self, now: Instant) {
        let Some(ttl) = self.config.fragment_ttl else {
            return;
        };
        let expired = self.assembler.sweep(ttl, now);
        if expired > 0 {
            tracing::info!(expired, "expired partial multipart messages dropped");
        }
    }

    pub fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            connections: self.registry.count(),
            operators: self.registry.operator_count(),
            gateway_connected: self.registry.gateway().is_some(),
            lines: self.lines.len(),
            pending_fragments: self.assembler.pending(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn lines(&self) -> &LineRegistry {
        &self.lines
    }
}

fn log_dispatch_error(conn_id: &ConnectionId, message_type: &str, err: &HubError) {
    match err {
        HubError::NoGatewayConnected => tracing::debug!(
            conn_id = %conn_id,
            message_type = %message_type,
            "no gateway connected, message dropped"
        ),
        _ => tracing::warn!(
            conn_id = %conn_id,
            message_type = %message_type,
            error_kind = err.error_kind(),
            error = %err,
            "message dropped"
        ),
    }
}
