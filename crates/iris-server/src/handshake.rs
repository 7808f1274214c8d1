//! `whoareyou` / `iam` exchange.
//!
//! The hub greets every new connection, answers greetings from peers, and
//! promotes a connection to operator or gateway from what it declares. A
//! connection is promoted at most once.

use iris_core::ids::{correlation_id, ConnectionId};
use iris_core::message::{
    CLIENT_CONNECT_ACKNOWLEDGE, GET_LINES, IAM, SERVER_NAME, SERVER_TYPE, SERVER_VERSION,
    WHOAREYOU,
};
use iris_core::{HubError, Identification, LogicalMessage, PeerRole};
use serde_json::{json, Value};

use crate::registry::ConnectionRegistry;

/// Greeting sent to every new connection.
pub fn greeting() -> LogicalMessage {
    LogicalMessage::with_payload(
        WHOAREYOU,
        json!({
            "qid": correlation_id(),
            "type": SERVER_TYPE,
            "name": SERVER_NAME,
            "version": SERVER_VERSION,
        }),
    )
}

/// Answer to a peer's `whoareyou`, echoing its `qid`.
pub fn iam_reply(qid: Value) -> LogicalMessage {
    LogicalMessage::with_payload(
        IAM,
        json!({
            "qid": qid,
            "type": SERVER_TYPE,
            "name": SERVER_NAME,
            "version": SERVER_VERSION,
        }),
    )
}

/// Request for the gateway's complete line list.
pub fn full_sync_request() -> LogicalMessage {
    LogicalMessage::with_payload(
        GET_LINES,
        json!({
            "qid": correlation_id(),
            "userlogin": "",
            "userid": "",
            "mode": "full",
        }),
    )
}

/// Apply a peer's declared identity.
///
/// Operators get `clientconnectacknowledge`; a gateway becomes the current
/// gateway and is asked for a full line sync. Returns the connection's role
/// afterwards.
pub fn identify(
    registry: &mut ConnectionRegistry,
    id: &ConnectionId,
    identification: Identification,
) -> Result<PeerRole, HubError> {
    let current = registry
        .get(id)
        .map(|conn| conn.role)
        .ok_or_else(|| HubError::Transport(format!("identification from unknown connection {id}")))?;

    if current != PeerRole::Unclassified {
        tracing::info!(
            conn_id = %id,
            role = %current,
            declared = %identification.role(),
            "connection already identified, ignoring"
        );
        return Ok(current);
    }

    match identification {
        Identification::Operator {
            user_id,
            user_login,
        } => {
            let ack = LogicalMessage::with_payload(
                CLIENT_CONNECT_ACKNOWLEDGE,
                json!({ "userid": user_id }),
            );
            tracing::info!(conn_id = %id, user_id = %user_id, user_login = %user_login, "operator identified");
            registry.set_operator(id, user_id, user_login);
            registry.send_to(id, ack.to_wire());
            Ok(PeerRole::OperatorClient)
        }
        Identification::Gateway => {
            if let Some(previous) = registry.set_gateway(id) {
                tracing::warn!(
                    conn_id = %id,
                    previous = %previous,
                    "gateway replaced; previous connection left open"
                );
            } else {
                tracing::info!(conn_id = %id, "gateway identified");
            }
            registry.send_to(id, full_sync_request().to_wire());
            Ok(PeerRole::TelephonyGateway)
        }
        Identification::Other(declared) => {
            tracing::debug!(conn_id = %id, declared = %declared, "unknown peer type, left unclassified");
            Ok(PeerRole::Unclassified)
        }
    }
}
