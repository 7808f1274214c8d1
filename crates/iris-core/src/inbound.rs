//! Typed view of an inbound message: what the hub must do with it.
//!
//! `Inbound::classify` is the single place where message types map to
//! actions, and where payload shapes are validated. Handlers downstream never
//! look at raw JSON fields again.

use serde_json::{Map, Value};

use crate::errors::HubError;
use crate::ids::{PeerRole, OPERATOR_CLIENT_TYPE};
use crate::lines::{LineRecord, LineStateUpdate};
use crate::message::{
    scalar_string, LogicalMessage, CLIENT_COMMANDS, GATEWAY_EVENTS, GET_ACTIVE_USERS,
    GET_LINES_RESULT, IAM, LINE_STATE_CHANGED, LIST_LINES, MULTIPART, PING, REMOTE_COMMANDS,
    WHOAREYOU,
};

/// Identity an operator message is addressed to. At least one field is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: Option<String>,
    pub user_login: Option<String>,
}

impl Recipient {
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, HubError> {
        let user_id = payload.get("userid").and_then(scalar_string);
        let user_login = payload.get("userlogin").and_then(scalar_string);
        if user_id.is_none() && user_login.is_none() {
            return Err(HubError::malformed("payload carries neither userid nor userlogin"));
        }
        Ok(Self {
            user_id,
            user_login,
        })
    }

    /// True when either identity field matches.
    pub fn matches(&self, user_id: &str, user_login: &str) -> bool {
        self.user_id.as_deref() == Some(user_id) || self.user_login.as_deref() == Some(user_login)
    }
}

/// What a peer declared about itself in `iam` / `whoareyou`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identification {
    Operator { user_id: String, user_login: String },
    Gateway,
    /// Declared type the hub does not classify; the connection stays as is.
    Other(String),
}

impl Identification {
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, HubError> {
        let declared = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match PeerRole::from_declared(declared) {
            PeerRole::OperatorClient => {
                let user_id = payload.get("userid").and_then(scalar_string);
                let user_login = payload.get("userlogin").and_then(scalar_string);
                match (user_id, user_login) {
                    (Some(user_id), Some(user_login)) => Ok(Self::Operator {
                        user_id,
                        user_login,
                    }),
                    _ => Err(HubError::malformed(format!(
                        "{OPERATOR_CLIENT_TYPE} identification requires userid and userlogin"
                    ))),
                }
            }
            PeerRole::TelephonyGateway => Ok(Self::Gateway),
            PeerRole::Unclassified => Ok(Self::Other(declared.to_owned())),
        }
    }

    pub fn role(&self) -> PeerRole {
        match self {
            Self::Operator { .. } => PeerRole::OperatorClient,
            Self::Gateway => PeerRole::TelephonyGateway,
            Self::Other(_) => PeerRole::Unclassified,
        }
    }
}

/// One `multipart` envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub message_id: String,
    pub packet_number: usize,
    pub packet_count: usize,
    pub content_type: Option<String>,
    pub transfer_encoding: String,
    pub content_length: Option<usize>,
    pub content: String,
}

impl Fragment {
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, HubError> {
        let message_id = payload
            .get("message-id")
            .and_then(scalar_string)
            .ok_or_else(|| HubError::malformed("multipart without message-id"))?;
        let packet_number = count_field(payload, "packetnumber")?;
        let packet_count = count_field(payload, "packetcount")?;
        if packet_count == 0 {
            return Err(HubError::malformed("multipart packetcount is zero"));
        }
        if packet_number >= packet_count {
            return Err(HubError::malformed(format!(
                "multipart packetnumber {packet_number} outside packetcount {packet_count}"
            )));
        }
        Ok(Self {
            message_id,
            packet_number,
            packet_count,
            content_type: payload
                .get("content-type")
                .and_then(Value::as_str)
                .map(str::to_owned),
            transfer_encoding: payload
                .get("content-transfer-encoding")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            content_length: payload
                .get("content-length")
                .and_then(as_count),
            content: payload
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        })
    }
}

fn as_count(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count_field(payload: &Map<String, Value>, key: &str) -> Result<usize, HubError> {
    payload
        .get(key)
        .and_then(as_count)
        .ok_or_else(|| HubError::malformed(format!("multipart {key} missing or not a count")))
}

/// Routing decision for one logical message.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Client command, forwarded verbatim to the gateway.
    ToGateway(LogicalMessage),
    /// Gateway result or event for exactly one operator.
    ToOperator {
        recipient: Recipient,
        message: LogicalMessage,
    },
    /// `whoareyou`: answer with `iam`, then identify from the same payload.
    ///
    /// The identification outcome is kept separate so the reply still goes
    /// out when the declared identity is incomplete.
    Greeting {
        qid: Value,
        identification: Result<Identification, HubError>,
    },
    /// `iam`.
    Identify(Identification),
    /// Full line list from the gateway.
    LineSync(Vec<LineRecord>),
    /// Line state changes; `message` is rebroadcast to operators as received.
    LineStateChanged {
        updates: Vec<LineStateUpdate>,
        message: LogicalMessage,
    },
    /// Gateway asks for the connected operators.
    ListActiveUsers { qid: Value },
    /// Operator asks for the cached line list.
    ListLines {
        user_id: Value,
        user_login: Value,
    },
    Ping(LogicalMessage),
    /// Forms/methods command for the external API.
    RemoteCommand(LogicalMessage),
    Fragment(Fragment),
    Unrecognized(String),
}

impl Inbound {
    /// Map a message to its action, validating the payload on the way.
    pub fn classify(message: LogicalMessage) -> Result<Self, HubError> {
        let kind = message.message_type.clone();
        let inbound = match kind.as_str() {
            t if CLIENT_COMMANDS.contains(&t) => Self::ToGateway(message),
            t if GATEWAY_EVENTS.contains(&t) => Self::ToOperator {
                recipient: Recipient::from_payload(&message.payload)?,
                message,
            },
            t if REMOTE_COMMANDS.contains(&t) => Self::RemoteCommand(message),
            WHOAREYOU => Self::Greeting {
                qid: message.field("qid").cloned().unwrap_or(Value::Null),
                identification: Identification::from_payload(&message.payload),
            },
            IAM => Self::Identify(Identification::from_payload(&message.payload)?),
            GET_LINES_RESULT => {
                let Some(Value::Array(entries)) = message.field("numbers") else {
                    return Err(HubError::malformed("line list without a numbers array"));
                };
                let records = entries
                    .iter()
                    .filter_map(|entry| entry.as_object().cloned())
                    .filter_map(LineRecord::from_map)
                    .collect();
                Self::LineSync(records)
            }
            LINE_STATE_CHANGED => {
                let updates = match message.field("numbers") {
                    Some(Value::Array(entries)) => entries
                        .iter()
                        .filter_map(Value::as_object)
                        .filter_map(LineStateUpdate::from_map)
                        .collect(),
                    _ => LineStateUpdate::from_map(&message.payload)
                        .into_iter()
                        .collect(),
                };
                Self::LineStateChanged { updates, message }
            }
            GET_ACTIVE_USERS => Self::ListActiveUsers {
                qid: message.field("qid").cloned().unwrap_or(Value::Null),
            },
            LIST_LINES => Self::ListLines {
                user_id: message.field("userid").cloned().unwrap_or(Value::Null),
                user_login: message.field("userlogin").cloned().unwrap_or(Value::Null),
            },
            PING => Self::Ping(message),
            MULTIPART => Self::Fragment(Fragment::from_payload(&message.payload)?),
            _ => Self::Unrecognized(message.message_type),
        };
        Ok(inbound)
    }

    /// Short label for logs.
    pub fn action(&self) -> &'static str {
        match self {
            Self::ToGateway(_) => "to_gateway",
            Self::ToOperator { .. } => "to_operator",
            Self::Greeting { .. } => "greet_and_identify",
            Self::Identify(_) => "identify",
            Self::LineSync(_) => "line_sync",
            Self::LineStateChanged { .. } => "line_state_changed",
            Self::ListActiveUsers { .. } => "list_active_users",
            Self::ListLines { .. } => "list_lines",
            Self::Ping(_) => "ping",
            Self::RemoteCommand(_) => "remote_command",
            Self::Fragment(_) => "fragment",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(text: &str) -> Result<Inbound, HubError> {
        Inbound::classify(LogicalMessage::parse(text).unwrap())
    }

    #[test]
    fn client_commands_go_to_gateway() {
        for t in CLIENT_COMMANDS {
            let inbound = classify(&format!(r#"["{t}",{{"userid":"1"}}]"#)).unwrap();
            assert!(matches!(inbound, Inbound::ToGateway(_)), "{t}");
        }
    }

    #[test]
    fn gateway_events_target_an_operator() {
        for t in GATEWAY_EVENTS {
            let inbound = classify(&format!(r#"["{t}",{{"userid":"2"}}]"#)).unwrap();
            let Inbound::ToOperator { recipient, .. } = inbound else {
                panic!("{t} not targeted");
            };
            assert_eq!(recipient.user_id.as_deref(), Some("2"));
        }
    }

    #[test]
    fn targeted_event_without_identity_is_malformed() {
        let err = classify(r#"["loginresult",{"result":true}]"#).unwrap_err();
        assert!(matches!(err, HubError::MalformedInput(_)));
    }

    #[test]
    fn recipient_matches_either_field() {
        let by_login = Recipient {
            user_id: None,
            user_login: Some("bob".into()),
        };
        assert!(by_login.matches("7", "bob"));
        assert!(!by_login.matches("7", "alice"));
        let by_id = Recipient {
            user_id: Some("7".into()),
            user_login: None,
        };
        assert!(by_id.matches("7", "alice"));
    }

    #[test]
    fn operator_identification() {
        let inbound =
            classify(r#"["iam",{"type":"iriscrm-client","userid":5,"userlogin":"bob"}]"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Identify(Identification::Operator {
                user_id: "5".into(),
                user_login: "bob".into()
            })
        );
    }

    #[test]
    fn operator_identification_requires_both_ids() {
        let err = classify(r#"["iam",{"type":"iriscrm-client","userid":"5"}]"#).unwrap_err();
        assert!(matches!(err, HubError::MalformedInput(_)));
    }

    #[test]
    fn unknown_declared_type_is_other() {
        let inbound = classify(r#"["iam",{"type":"toaster"}]"#).unwrap();
        assert_eq!(inbound, Inbound::Identify(Identification::Other("toaster".into())));
        assert_eq!(Identification::Other("x".into()).role(), PeerRole::Unclassified);
    }

    #[test]
    fn greeting_keeps_qid_and_identity() {
        let inbound = classify(r#"["whoareyou",{"qid":"Q1","type":"commserver"}]"#).unwrap();
        let Inbound::Greeting {
            qid,
            identification,
        } = inbound
        else {
            panic!("expected greeting");
        };
        assert_eq!(qid, json!("Q1"));
        assert_eq!(identification.unwrap(), Identification::Gateway);
    }

    #[test]
    fn greeting_with_incomplete_identity_still_classifies() {
        let inbound = classify(r#"["whoareyou",{"qid":"Q1","type":"iriscrm-client"}]"#).unwrap();
        let Inbound::Greeting { identification, .. } = inbound else {
            panic!("expected greeting");
        };
        assert!(identification.is_err());
    }

    #[test]
    fn line_sync_skips_entries_without_number() {
        let inbound = classify(
            r#"["getpbxnumbersresult",{"numbers":[{"number":"101","state":"idle"},{"state":"x"},7]}]"#,
        )
        .unwrap();
        let Inbound::LineSync(records) = inbound else {
            panic!("expected line sync");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, "101");
    }

    #[test]
    fn line_sync_requires_numbers() {
        assert!(classify(r#"["getpbxnumbersresult",{}]"#).is_err());
    }

    #[test]
    fn state_change_as_list_or_single() {
        let list = classify(
            r#"["pbxnumberstatechanged",{"numbers":[{"num":"101","numstateid":"busy"},{"num":"102","numstateid":"idle"}]}]"#,
        )
        .unwrap();
        let Inbound::LineStateChanged { updates, .. } = list else {
            panic!("expected state change");
        };
        assert_eq!(updates.len(), 2);

        let single = classify(r#"["pbxnumberstatechanged",{"num":"101","numstateid":"busy"}]"#)
            .unwrap();
        let Inbound::LineStateChanged { updates, message } = single else {
            panic!("expected state change");
        };
        assert_eq!(updates[0].number, "101");
        assert_eq!(message.message_type, LINE_STATE_CHANGED);
    }

    #[test]
    fn list_requests_and_ping() {
        assert_eq!(
            classify(r#"["getactiveusers",{"qid":"A"}]"#).unwrap(),
            Inbound::ListActiveUsers { qid: json!("A") }
        );
        assert_eq!(
            classify(r#"["iris_getpbxnumberslist",{"userid":"1","userlogin":"u"}]"#).unwrap(),
            Inbound::ListLines {
                user_id: json!("1"),
                user_login: json!("u")
            }
        );
        assert!(matches!(classify(r#"["ping",{"qid":"x"}]"#).unwrap(), Inbound::Ping(_)));
    }

    #[test]
    fn remote_commands() {
        for t in REMOTE_COMMANDS {
            let inbound = classify(&format!(r#"["{t}",{{}}]"#)).unwrap();
            assert_eq!(inbound.action(), "remote_command");
        }
    }

    #[test]
    fn unknown_type_is_unrecognized() {
        assert_eq!(
            classify(r#"["teleport",{}]"#).unwrap(),
            Inbound::Unrecognized("teleport".into())
        );
    }

    #[test]
    fn fragment_fields_accept_strings() {
        let inbound = classify(
            r#"["multipart",{"message-id":"m1","packetnumber":"1","packetcount":"3","content-type":"application/json","content-transfer-encoding":"base64","content-length":4,"content":"YWJj"}]"#,
        )
        .unwrap();
        let Inbound::Fragment(fragment) = inbound else {
            panic!("expected fragment");
        };
        assert_eq!(fragment.message_id, "m1");
        assert_eq!(fragment.packet_number, 1);
        assert_eq!(fragment.packet_count, 3);
        assert_eq!(fragment.content_length, Some(4));
        assert_eq!(fragment.content, "YWJj");
    }

    #[test]
    fn fragment_validation() {
        let base = |number: Value, count: Value| {
            let mut payload = Map::new();
            payload.insert("message-id".into(), json!("m"));
            payload.insert("packetnumber".into(), number);
            payload.insert("packetcount".into(), count);
            Fragment::from_payload(&payload)
        };
        assert!(base(json!(0), json!(0)).is_err());
        assert!(base(json!(2), json!(2)).is_err());
        assert!(base(json!(-1), json!(2)).is_err());
        assert!(base(json!("x"), json!(2)).is_err());
        assert!(base(json!(1), json!(2)).is_ok());

        let mut no_id = Map::new();
        no_id.insert("packetnumber".into(), json!(0));
        no_id.insert("packetcount".into(), json!(1));
        assert!(Fragment::from_payload(&no_id).is_err());
    }
}
