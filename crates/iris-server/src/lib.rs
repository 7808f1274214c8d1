pub mod api_bridge;
pub mod connection;
pub mod handshake;
pub mod hub;
pub mod registry;
pub mod server;

pub use api_bridge::{ApiBridge, ApiConfig, ApiResponse, BridgeError, HttpApiBridge, MockApiBridge};
pub use hub::{Hub, HubConfig, HubEvent, HubSnapshot};
pub use server::{start, start_with_bridge, ServerConfig, ServerError, ServerHandle};
