//! `multipart` reassembly and fragmentation.
//!
//! Inbound, a peer may split one logical message across several frames, each
//! carrying a slice of the base64-encoded JSON. Buffers are scoped to the
//! connection that opened them, so two peers choosing the same `message-id`
//! never mix. Outbound, [`fragment`] produces the same envelope for messages
//! above the frame limit.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::errors::HubError;
use crate::ids::{fragment_message_id, ConnectionId};
use crate::inbound::Fragment;
use crate::message::MULTIPART;

pub const BASE64_ENCODING: &str = "base64";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Outcome of feeding one fragment.
#[derive(Debug, PartialEq, Eq)]
pub enum Assembly {
    Incomplete,
    /// All packets arrived; the concatenated bytes in packet order.
    Complete(Vec<u8>),
}

struct AssemblyBuffer {
    expected: usize,
    received: usize,
    packets: BTreeMap<usize, Vec<u8>>,
    first_seen: Instant,
}

impl AssemblyBuffer {
    fn new(expected: usize, now: Instant) -> Self {
        Self {
            expected,
            received: 0,
            packets: BTreeMap::new(),
            first_seen: now,
        }
    }

    fn insert(&mut self, number: usize, bytes: Vec<u8>) {
        if self.packets.insert(number, bytes).is_none() {
            self.received += 1;
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.expected
    }

    fn reassemble(self) -> Vec<u8> {
        self.packets.into_values().flatten().collect()
    }
}

type BufferKey = (ConnectionId, String);

/// Partial multipart messages, keyed by sender and `message-id`.
pub struct MultipartAssembler {
    pending: HashMap<BufferKey, AssemblyBuffer>,
    max_packet_count: usize,
}

impl MultipartAssembler {
    pub fn new(max_packet_count: usize) -> Self {
        Self {
            pending: HashMap::new(),
            max_packet_count,
        }
    }

    pub fn accept(&mut self, conn: &ConnectionId, fragment: Fragment) -> Result<Assembly, HubError> {
        self.accept_at(conn, fragment, Instant::now())
    }

    /// Store one packet. Returns the reassembled bytes once every packet of
    /// the message has been seen, and forgets the message.
    pub fn accept_at(
        &mut self,
        conn: &ConnectionId,
        fragment: Fragment,
        now: Instant,
    ) -> Result<Assembly, HubError> {
        if fragment.packet_count > self.max_packet_count {
            return Err(HubError::malformed(format!(
                "multipart packetcount {} exceeds limit {}",
                fragment.packet_count, self.max_packet_count
            )));
        }

        let key = (conn.clone(), fragment.message_id);
        if let Some(buffer) = self.pending.get(&key) {
            if buffer.expected != fragment.packet_count {
                return Err(HubError::malformed(format!(
                    "multipart packetcount {} disagrees with {} for message-id {}",
                    fragment.packet_count, buffer.expected, key.1
                )));
            }
        }

        let bytes = match decode_content(&fragment.transfer_encoding, &fragment.content) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(
                    conn_id = %conn,
                    message_id = %key.1,
                    packet = fragment.packet_number,
                    error = %err,
                    "fragment content dropped"
                );
                Vec::new()
            }
        };

        let buffer = self
            .pending
            .entry(key.clone())
            .or_insert_with(|| AssemblyBuffer::new(fragment.packet_count, now));
        buffer.insert(fragment.packet_number, bytes);

        if !buffer.is_complete() {
            return Ok(Assembly::Incomplete);
        }
        match self.pending.remove(&key) {
            Some(buffer) => Ok(Assembly::Complete(buffer.reassemble())),
            None => Ok(Assembly::Incomplete),
        }
    }

    /// Drop every partial message the connection started.
    pub fn discard_connection(&mut self, conn: &ConnectionId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(owner, _), _| owner != conn);
        before - self.pending.len()
    }

    /// Drop partial messages older than `ttl`.
    pub fn sweep(&mut self, ttl: Duration, now: Instant) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, buffer| now.saturating_duration_since(buffer.first_seen) < ttl);
        before - self.pending.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Decode one packet's `content`.
pub fn decode_content(encoding: &str, content: &str) -> Result<Vec<u8>, HubError> {
    if !encoding.eq_ignore_ascii_case(BASE64_ENCODING) {
        return Err(HubError::UnknownFragmentEncoding(encoding.to_owned()));
    }
    STANDARD
        .decode(content.trim())
        .map_err(|e| HubError::UnknownFragmentEncoding(format!("invalid base64: {e}")))
}

/// Split a serialized message into frames of at most `limit` bytes of content.
///
/// Messages within the limit pass through untouched. Larger ones are
/// base64-encoded and cut into `multipart` frames in packet order. Chunks are
/// a multiple of four characters so each decodes on its own, so a `limit`
/// under 4 still yields 4-character chunks.
pub fn fragment(serialized: &str, limit: usize) -> Vec<String> {
    if serialized.len() <= limit {
        return vec![serialized.to_owned()];
    }

    let encoded = STANDARD.encode(serialized.as_bytes());
    let chunk_size = (limit / 4 * 4).max(4);
    let chunks: Vec<&str> = encoded
        .as_bytes()
        .chunks(chunk_size)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect();
    let message_id = fragment_message_id();
    let packet_count = chunks.len();

    chunks
        .into_iter()
        .enumerate()
        .map(|(packet_number, chunk)| {
            Value::Array(vec![
                Value::String(MULTIPART.to_owned()),
                json!({
                    "message-id": message_id,
                    "packetcount": packet_count,
                    "packetnumber": packet_number,
                    "content-type": JSON_CONTENT_TYPE,
                    "content-transfer-encoding": BASE64_ENCODING,
                    "content-length": chunk.len(),
                    "content": chunk,
                }),
            ])
            .to_string()
        })
        .collect()
}
