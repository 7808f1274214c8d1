//! Bridge from remote form/method commands to the external CRM API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use iris_core::{HubError, LogicalMessage};
use parking_lot::Mutex;
use reqwest::Client;

/// Failure talking to the external API.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("http client setup failed: {0}")]
    Setup(String),
    #[error("request failed: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("api answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("api response is not a message: {0}")]
    InvalidResponse(String),
}

impl BridgeError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Status { .. } => "status",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<BridgeError> for HubError {
    fn from(err: BridgeError) -> Self {
        Self::ExternalService(err.to_string())
    }
}

/// Raw HTTP answer from the API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// Decode a successful answer into the message to route onward.
    pub fn into_message(self) -> Result<LogicalMessage, BridgeError> {
        if !(200..300).contains(&self.status) {
            return Err(BridgeError::Status {
                status: self.status,
                body: self.body,
            });
        }
        LogicalMessage::parse(&self.body).map_err(|e| BridgeError::InvalidResponse(e.to_string()))
    }
}

/// Executes one remote command against the external API.
#[async_trait]
pub trait ApiBridge: Send + Sync {
    async fn execute(&self, request: &LogicalMessage) -> Result<ApiResponse, BridgeError>;
}

/// HTTP settings for [`HttpApiBridge`].
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub url: String,
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

/// Posts the command as form field `data`, holding the base64 of its wire form.
pub struct HttpApiBridge {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpApiBridge {
    pub fn new(config: &ApiConfig) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| BridgeError::Setup(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            timeout: config.timeout,
        })
    }
}

/// Form body for a command.
pub fn encode_request(request: &LogicalMessage) -> String {
    STANDARD.encode(request.to_wire())
}

#[async_trait]
impl ApiBridge for HttpApiBridge {
    async fn execute(&self, request: &LogicalMessage) -> Result<ApiResponse, BridgeError> {
        let response = self
            .client
            .post(&self.url)
            .form(&[("data", encode_request(request))])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BridgeError::Timeout(self.timeout)
                } else {
                    BridgeError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))?;
        Ok(ApiResponse { status, body })
    }
}

/// Pre-programmed bridge for tests. Answers in order, repeating the last
/// answer once the list runs out.
pub struct MockApiBridge {
    responses: Vec<Result<ApiResponse, BridgeError>>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<LogicalMessage>>,
}

impl MockApiBridge {
    pub fn new(responses: Vec<Result<ApiResponse, BridgeError>>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Commands received so far.
    pub fn requests(&self) -> Vec<LogicalMessage> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ApiBridge for MockApiBridge {
    async fn execute(&self, request: &LogicalMessage) -> Result<ApiResponse, BridgeError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());
        self.responses
            .get(idx)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_else(|| Err(BridgeError::Network("no mock response".into())))
    }
}
