use std::collections::BTreeMap;

use iris_core::ids::ConnectionId;
use iris_core::{HubError, PeerRole, Recipient};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// One live WebSocket session as the hub sees it.
pub struct Connection {
    pub id: ConnectionId,
    pub role: PeerRole,
    pub user_id: Option<String>,
    pub user_login: Option<String>,
    tx: mpsc::Sender<String>,
}

impl Connection {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            role: PeerRole::Unclassified,
            user_id: None,
            user_login: None,
            tx,
        }
    }

    pub fn is_operator(&self) -> bool {
        self.role == PeerRole::OperatorClient
    }

    fn matches(&self, recipient: &Recipient) -> bool {
        match (&self.user_id, &self.user_login) {
            (Some(user_id), Some(user_login)) => recipient.matches(user_id, user_login),
            _ => false,
        }
    }

    /// Queue a frame. Fails fast when the writer is behind or gone.
    fn send(&self, message: String) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    conn_id = %self.id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Every live connection, in connect order, plus the current gateway.
///
/// The gateway field is a reference only: replacing it does not close the
/// previous gateway connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, Connection>,
    gateway: Option<ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: ConnectionId, tx: mpsc::Sender<String>) {
        let _ = self.connections.insert(id.clone(), Connection::new(id, tx));
    }

    /// Remove a connection. Clears the gateway reference if it pointed here.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<Connection> {
        if self.gateway.as_ref() == Some(id) {
            self.gateway = None;
        }
        self.connections.remove(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Record operator identity on an unclassified connection.
    pub fn set_operator(&mut self, id: &ConnectionId, user_id: String, user_login: String) -> bool {
        let Some(conn) = self.connections.get_mut(id) else {
            return false;
        };
        conn.role = PeerRole::OperatorClient;
        conn.user_id = Some(user_id);
        conn.user_login = Some(user_login);
        true
    }

    /// Make `id` the gateway. Returns the gateway it replaced, if any.
    pub fn set_gateway(&mut self, id: &ConnectionId) -> Option<ConnectionId> {
        let Some(conn) = self.connections.get_mut(id) else {
            return None;
        };
        conn.role = PeerRole::TelephonyGateway;
        self.gateway.replace(id.clone()).filter(|prev| prev != id)
    }

    pub fn gateway(&self) -> Option<&ConnectionId> {
        self.gateway.as_ref()
    }

    pub fn send_to(&self, id: &ConnectionId, message: String) -> bool {
        self.connections
            .get(id)
            .is_some_and(|conn| conn.send(message))
    }

    pub fn send_to_gateway(&self, message: String) -> Result<bool, HubError> {
        let gateway = self.gateway.as_ref().ok_or(HubError::NoGatewayConnected)?;
        Ok(self.send_to(gateway, message))
    }

    /// First operator, in connect order, whose `userid` or `userlogin`
    /// matches.
    pub fn find_operator(&self, recipient: &Recipient) -> Option<&ConnectionId> {
        self.operators()
            .find(|conn| conn.matches(recipient))
            .map(|conn| &conn.id)
    }

    pub fn operators(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(|conn| conn.is_operator())
    }

    /// Send to every operator. Returns how many accepted the frame.
    pub fn broadcast_to_operators(&self, message: &str) -> usize {
        self.operators()
            .filter(|conn| conn.send(message.to_string()))
            .count()
    }

    /// `{userlogin, userid, type}` for every operator.
    pub fn active_users(&self) -> Vec<Value> {
        self.operators()
            .map(|conn| {
                json!({
                    "userlogin": conn.user_login,
                    "userid": conn.user_id,
                    "type": conn.role.declared_type(),
                })
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn operator_count(&self) -> usize {
        self.operators().count()
    }
}
