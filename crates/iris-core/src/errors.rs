/// Error taxonomy for everything that can go wrong while handling one frame.
///
/// None of these are fatal to the hub: the dispatcher logs them against the
/// originating connection and moves on to the next event.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// Frame or payload does not have the shape its message type requires.
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// A gateway-bound message arrived while no gateway is registered.
    #[error("no telephony gateway connected")]
    NoGatewayConnected,
    /// A fragment used a transfer encoding other than base64.
    #[error("unknown fragment encoding: {0}")]
    UnknownFragmentEncoding(String),
    /// The external forms/methods API failed or answered with garbage.
    #[error("external service failure: {0}")]
    ExternalService(String),
    /// The WebSocket itself failed (read error, undecodable frame).
    #[error("transport error: {0}")]
    Transport(String),
}

impl HubError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed_input",
            Self::NoGatewayConnected => "no_gateway_connected",
            Self::UnknownFragmentEncoding(_) => "unknown_fragment_encoding",
            Self::ExternalService(_) => "external_service",
            Self::Transport(_) => "transport",
        }
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedInput(err.to_string())
    }
}
