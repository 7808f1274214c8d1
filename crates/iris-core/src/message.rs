//! The `[type, payload]` wire message and the message catalogue.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::errors::HubError;

// ── Handshake ──────────────────────────────────────────────────────

pub const WHOAREYOU: &str = "whoareyou";
pub const IAM: &str = "iam";
pub const CLIENT_CONNECT_ACKNOWLEDGE: &str = "clientconnectacknowledge";

/// Self-identification the hub sends in `whoareyou` / `iam`.
pub const SERVER_TYPE: &str = "ws-server";
pub const SERVER_NAME: &str = "Iris CRM";
pub const SERVER_VERSION: &str = "2.0";

// ── Client commands (forwarded to the gateway) ─────────────────────

pub const CLIENT_COMMANDS: &[&str] = &[
    "login",
    "logout",
    "entercallcenter",
    "exitcallcenter",
    "getuserstate",
    "setuserstate",
    "pbxautocallstart",
    "pbxautocallabort",
    "pbxtransfercall",
    GET_LINES,
    "pbxabortcall",
    "sendusertextmessage",
];

// ── Gateway results/events (delivered to one operator) ─────────────

pub const GATEWAY_EVENTS: &[&str] = &[
    "loginresult",
    "logoutresult",
    "userstatechanged",
    "getuserstateresult",
    "closeform",
    "shownotifymessage",
    "pbxautocallstartresult",
    "pbxtransfercallresult",
    "phoneevent_ringstarted",
    "phoneevent_ringstopped",
    "phoneevent_commstarted",
    "phoneevent_commstopped",
    "phoneevent_ivrstarted",
    "phoneevent_ivrstopped",
    "phoneevent_acmcallstarted",
    "phoneevent_acmcallstopped",
    "phoneevent_faxstarted",
    "phoneevent_faxstopped",
    "phoneevent_faxreceived",
    "usertextmessagereceived",
];

// ── Lines ──────────────────────────────────────────────────────────

pub const GET_LINES: &str = "getpbxnumbers";
pub const GET_LINES_RESULT: &str = "getpbxnumbersresult";
pub const LINE_STATE_CHANGED: &str = "pbxnumberstatechanged";
pub const LIST_LINES: &str = "iris_getpbxnumberslist";
pub const LINES_LIST: &str = "pbxnumberslist";

// ── Active users ───────────────────────────────────────────────────

pub const GET_ACTIVE_USERS: &str = "getactiveusers";
pub const ACTIVE_USERS: &str = "activeusers";

// ── Misc ───────────────────────────────────────────────────────────

pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const MULTIPART: &str = "multipart";

// ── Remote forms/methods (bridged to the external API) ─────────────

pub const SHOW_FORM: &str = "showform";
pub const REMOTE_COMMANDS: &[&str] = &[
    "getavailableforms",
    "getavailablemethods",
    SHOW_FORM,
    "executemethod",
];

/// One routable message, independent of how many frames carried it.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalMessage {
    pub message_type: String,
    pub payload: Map<String, Value>,
}

impl LogicalMessage {
    pub fn new(message_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }

    /// Build from any JSON value; non-object payloads become empty.
    pub fn with_payload(message_type: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(message_type, payload)
    }

    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, HubError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse reassembled multipart bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HubError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize to the `[type, payload]` text form.
    pub fn to_wire(&self) -> String {
        Value::Array(vec![
            Value::String(self.message_type.clone()),
            Value::Object(self.payload.clone()),
        ])
        .to_string()
    }

    /// Same payload under a different type (e.g. `ping` → `pong`).
    pub fn retyped(&self, message_type: impl Into<String>) -> Self {
        Self::new(message_type, self.payload.clone())
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// String-ish field: JSON strings as-is, numbers rendered as text.
    pub fn scalar(&self, key: &str) -> Option<String> {
        self.payload.get(key).and_then(scalar_string)
    }
}

impl Serialize for LogicalMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.message_type, &self.payload).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LogicalMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (message_type, payload): (String, Value) = Deserialize::deserialize(deserializer)?;
        let payload = match payload {
            Value::Object(map) => map,
            // PHP peers encode an empty payload as `[]`.
            Value::Null => Map::new(),
            Value::Array(items) if items.is_empty() => Map::new(),
            other => {
                return Err(D::Error::custom(format!(
                    "payload of '{message_type}' must be an object, got {other}"
                )))
            }
        };
        Ok(Self {
            message_type,
            payload,
        })
    }
}

/// Render a JSON scalar as text. Peers send ids both as strings and numbers.
pub(crate) fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_wire_pair() {
        let msg = LogicalMessage::parse(r#"["ping",{"qid":"x"}]"#).unwrap();
        assert_eq!(msg.message_type, "ping");
        assert_eq!(msg.field("qid"), Some(&json!("x")));
    }

    #[test]
    fn to_wire_is_two_element_array() {
        let msg = LogicalMessage::with_payload("pong", json!({"qid": "x"}));
        let parsed: Value = serde_json::from_str(&msg.to_wire()).unwrap();
        assert_eq!(parsed, json!(["pong", {"qid": "x"}]));
    }

    #[test]
    fn serialize_matches_to_wire() {
        let msg = LogicalMessage::with_payload("iam", json!({"type": "ws-server"}));
        assert_eq!(serde_json::to_string(&msg).unwrap(), msg.to_wire());
    }

    #[test]
    fn empty_array_payload_is_empty_object() {
        let msg = LogicalMessage::parse(r#"["getactiveusers",[]]"#).unwrap();
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn rejects_non_array_frames() {
        assert!(LogicalMessage::parse(r#"{"type":"ping"}"#).is_err());
        assert!(LogicalMessage::parse("not json").is_err());
        assert!(LogicalMessage::parse("").is_err());
    }

    #[test]
    fn rejects_scalar_payload() {
        let err = LogicalMessage::parse(r#"["ping", 42]"#).unwrap_err();
        assert!(matches!(err, HubError::MalformedInput(_)));
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(LogicalMessage::parse(r#"["ping"]"#).is_err());
        assert!(LogicalMessage::parse(r#"["ping", {}, {}]"#).is_err());
    }

    #[test]
    fn retyped_keeps_payload() {
        let ping = LogicalMessage::with_payload("ping", json!({"qid": "x", "n": 1}));
        let pong = ping.retyped(PONG);
        assert_eq!(pong.message_type, "pong");
        assert_eq!(pong.payload, ping.payload);
    }

    #[test]
    fn scalar_accepts_numbers() {
        let msg = LogicalMessage::with_payload("x", json!({"userid": 17, "userlogin": "a", "flag": true}));
        assert_eq!(msg.scalar("userid").as_deref(), Some("17"));
        assert_eq!(msg.scalar("userlogin").as_deref(), Some("a"));
        assert_eq!(msg.scalar("flag"), None);
        assert_eq!(msg.scalar("missing"), None);
    }

    #[test]
    fn catalogues_do_not_overlap() {
        for t in CLIENT_COMMANDS {
            assert!(!GATEWAY_EVENTS.contains(t), "{t} in both catalogues");
            assert!(!REMOTE_COMMANDS.contains(t), "{t} in both catalogues");
        }
    }
}
