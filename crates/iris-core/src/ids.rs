use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Declared handshake type of an operator (front-end) client.
pub const OPERATOR_CLIENT_TYPE: &str = "iriscrm-client";
/// Declared handshake type of the telephony gateway.
pub const TELEPHONY_GATEWAY_TYPE: &str = "commserver";

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// v7 ids sort by creation time, so ordered maps keyed by them iterate in
// connect order.
branded_id!(ConnectionId, "conn");

/// Fresh correlation id (`qid`) for hub-originated requests.
///
/// Random 128-bit value in canonical hyphenated form, upper-case.
pub fn correlation_id() -> String {
    Uuid::new_v4().hyphenated().to_string().to_uppercase()
}

/// Fresh `message-id` for an outbound multipart sequence.
pub fn fragment_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Classification of a connection, set once by the handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    #[default]
    Unclassified,
    OperatorClient,
    TelephonyGateway,
}

impl PeerRole {
    /// Map a declared handshake `type` to a role. Unknown types stay unclassified.
    pub fn from_declared(declared: &str) -> Self {
        match declared {
            OPERATOR_CLIENT_TYPE => Self::OperatorClient,
            TELEPHONY_GATEWAY_TYPE => Self::TelephonyGateway,
            _ => Self::Unclassified,
        }
    }

    /// The handshake `type` string for this role, if it has one.
    pub fn declared_type(self) -> Option<&'static str> {
        match self {
            Self::OperatorClient => Some(OPERATOR_CLIENT_TYPE),
            Self::TelephonyGateway => Some(TELEPHONY_GATEWAY_TYPE),
            Self::Unclassified => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unclassified => "unclassified",
            Self::OperatorClient => "operator_client",
            Self::TelephonyGateway => "telephony_gateway",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn connection_ids_sort_in_creation_order() {
        let ids: Vec<ConnectionId> = (0..100).map(|_| ConnectionId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {} >= {}", w[0], w[1]);
        }
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = ConnectionId::from_raw("conn_custom");
        assert_eq!(id.as_str(), "conn_custom");
        let parsed: ConnectionId = "conn_custom".parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn correlation_id_is_canonical_uuid_text() {
        let qid = correlation_id();
        assert_eq!(qid.len(), 36);
        let dashes: Vec<usize> = qid.match_indices('-').map(|(i, _)| i).collect();
        assert_eq!(dashes, vec![8, 13, 18, 23]);
        assert_eq!(qid, qid.to_uppercase());
        assert_ne!(qid, correlation_id());
    }

    #[test]
    fn role_from_declared_type() {
        assert_eq!(PeerRole::from_declared("iriscrm-client"), PeerRole::OperatorClient);
        assert_eq!(PeerRole::from_declared("commserver"), PeerRole::TelephonyGateway);
        assert_eq!(PeerRole::from_declared("ws-server"), PeerRole::Unclassified);
        assert_eq!(PeerRole::from_declared(""), PeerRole::Unclassified);
    }

    #[test]
    fn declared_type_roundtrip() {
        for role in [PeerRole::OperatorClient, PeerRole::TelephonyGateway] {
            let declared = role.declared_type().unwrap();
            assert_eq!(PeerRole::from_declared(declared), role);
        }
        assert_eq!(PeerRole::Unclassified.declared_type(), None);
    }
}
