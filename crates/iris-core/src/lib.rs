//! # iris-core
//!
//! Protocol model shared by the hub: the `[type, payload]` wire message,
//! the message catalogue and its typed inbound variants, connection ids and
//! roles, multipart reassembly/fragmentation, and the line-state cache.

pub mod errors;
pub mod ids;
pub mod inbound;
pub mod lines;
pub mod message;
pub mod multipart;

pub use errors::HubError;
pub use ids::{ConnectionId, PeerRole};
pub use inbound::{Fragment, Identification, Inbound, Recipient};
pub use lines::{LineRecord, LineRegistry, LineStateUpdate};
pub use message::LogicalMessage;
pub use multipart::{Assembly, MultipartAssembler};
