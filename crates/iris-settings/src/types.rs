//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`,
//! so a settings file only needs the values it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Smallest `multipart.maxFrameSize`: one base64 quantum.
pub const MIN_FRAME_SIZE: usize = 4;

/// Root settings for the hub.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "api": { "url": "https://crm.example/api/ws" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IrisSettings {
    /// WebSocket listener and connection liveness.
    pub server: ServerSettings,
    /// Fragment reassembly and outbound fragmentation.
    pub multipart: MultipartSettings,
    /// External forms/methods API.
    pub api: ApiSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl IrisSettings {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be positive".into(),
            ));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be positive".into(),
            ));
        }
        if self.multipart.max_frame_size < MIN_FRAME_SIZE {
            return Err(SettingsError::InvalidValue(format!(
                "multipart.maxFrameSize must be at least {MIN_FRAME_SIZE}"
            )));
        }
        if self.multipart.max_packet_count == 0 {
            return Err(SettingsError::InvalidValue(
                "multipart.maxPacketCount must be positive".into(),
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "api.timeoutSecs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket port.
    pub port: u16,
    /// Outbound frames buffered per connection before sends are dropped.
    pub max_send_queue: usize,
    /// Interval between server pings.
    pub heartbeat_interval_secs: u64,
    /// A peer silent for this long is disconnected.
    pub client_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8045,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MultipartSettings {
    /// Largest outbound frame before a message is split. At least
    /// [`MIN_FRAME_SIZE`].
    pub max_frame_size: usize,
    /// Largest `packetcount` accepted from a peer.
    pub max_packet_count: usize,
    /// Partial messages older than this are dropped. `0` keeps them forever.
    pub fragment_ttl_secs: u64,
    /// How often expired partial messages are swept.
    pub sweep_interval_secs: u64,
}

impl Default for MultipartSettings {
    fn default() -> Self {
        Self {
            max_frame_size: 65_536,
            max_packet_count: 4096,
            fragment_ttl_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

/// External forms/methods API.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Endpoint receiving remote commands. Unset disables the bridge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Skip TLS certificate validation. The deployed CRM endpoints use
    /// self-signed certificates.
    pub accept_invalid_certs: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 10,
            accept_invalid_certs: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
    /// Log every inbound frame at debug level.
    pub log_frames: bool,
    /// Persist warnings and errors to SQLite.
    pub log_to_sqlite: bool,
    /// SQLite log database (relative to `~/.iris`).
    pub db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_frames: false,
            log_to_sqlite: false,
            db_path: "logs.db".to_string(),
        }
    }
}
