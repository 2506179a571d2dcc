//! Sync protocol: syscall names, typed request decoding, payload builders.
//!
//! DESIGN
//! ======
//! Frames stay flat `Data` maps on the wire. This module is the only place
//! that knows which keys each syscall carries. Inbound requests are decoded
//! into `ClientMessage` before any service sees them, so handlers work with
//! typed values and malformed payloads are rejected with a descriptive
//! `ProtocolError` instead of reaching the coordinator.
//!
//! Stream payloads are the exception: they are validated for shape but kept
//! verbatim, since the coordinator relays them without interpretation.

use serde_json::{Value, json};
use uuid::Uuid;

use crate::element::{Element, ElementId, normalize_all};
use crate::frame::{Data, ErrorCode, Frame};
use crate::store::DocumentMeta;

// =============================================================================
// SYSCALLS
// =============================================================================

pub const CANVAS_JOIN: &str = "canvas:join";
pub const CANVAS_UPDATE: &str = "canvas:update";
pub const CANVAS_STREAM: &str = "canvas:stream";
pub const CANVAS_LEAVE: &str = "canvas:leave";
pub const CANVAS_UPDATED: &str = "canvas:updated";
pub const CANVAS_STREAMED: &str = "canvas:streamed";
pub const PEER_JOINED: &str = "peer:joined";
pub const PEER_LEFT: &str = "peer:left";
/// First frame on every connection: the peer id and verified identity.
pub const SESSION_CONNECTED: &str = "session:connected";
/// Reply to text that is not a frame at all.
pub const GATEWAY_ERROR: &str = "gateway:error";

// Payload keys.
pub const KEY_DOCUMENT_ID: &str = "documentId";
pub const KEY_ELEMENTS: &str = "elements";
pub const KEY_ELEMENT: &str = "element";
pub const KEY_REMOVED_IDS: &str = "removedIds";
pub const KEY_MODE: &str = "mode";
pub const KEY_TIMESTAMP: &str = "timestamp";
pub const KEY_UPDATED_BY: &str = "updatedBy";
pub const KEY_SENDER: &str = "sender";
pub const KEY_PEER_ID: &str = "peerId";
pub const KEY_IDENTITY: &str = "identity";
pub const KEY_METADATA: &str = "metadata";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// A single in-progress element.
    Element,
    /// The sender's full current set plus explicit removals.
    Snapshot,
}

impl StreamMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Element => "element",
            Self::Snapshot => "snapshot",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "element" => Some(Self::Element),
            "snapshot" => Some(Self::Snapshot),
            _ => None,
        }
    }
}

/// A decoded client request.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Join { document_id: Uuid },
    Update { document_id: Uuid, elements: Vec<Element>, removed_ids: Vec<ElementId> },
    Stream { document_id: Uuid, mode: StreamMode, claimed_sender: Option<String>, payload: Data },
    Leave { document_id: Uuid },
}

impl ClientMessage {
    #[must_use]
    pub fn document_id(&self) -> Uuid {
        match self {
            Self::Join { document_id }
            | Self::Update { document_id, .. }
            | Self::Stream { document_id, .. }
            | Self::Leave { document_id } => *document_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
    #[error("{0} required")]
    MissingField(&'static str),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ErrorCode for ProtocolError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
            Self::MissingField(_) | Self::InvalidField { .. } => "E_INVALID_PAYLOAD",
        }
    }
}

// =============================================================================
// DECODING
// =============================================================================

impl ClientMessage {
    /// Decode a request frame. `now` stamps elements that carry no `createdAt`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` for unknown syscalls and malformed payloads.
    pub fn from_frame(frame: &Frame, now: i64) -> Result<Self, ProtocolError> {
        match frame.syscall.as_str() {
            CANVAS_JOIN => Ok(Self::Join { document_id: document_id(frame)? }),
            CANVAS_LEAVE => Ok(Self::Leave { document_id: document_id(frame)? }),
            CANVAS_UPDATE => {
                let document_id = document_id(frame)?;
                let raw = frame
                    .data
                    .get(KEY_ELEMENTS)
                    .ok_or(ProtocolError::MissingField(KEY_ELEMENTS))?;
                let Value::Array(items) = raw else {
                    return Err(ProtocolError::InvalidField { field: KEY_ELEMENTS, reason: "expected an array".into() });
                };
                Ok(Self::Update {
                    document_id,
                    elements: normalize_all(items, now),
                    removed_ids: removed_ids(&frame.data)?,
                })
            }
            CANVAS_STREAM => decode_stream(frame),
            other => Err(ProtocolError::UnknownSyscall(other.to_owned())),
        }
    }
}

fn document_id(frame: &Frame) -> Result<Uuid, ProtocolError> {
    match frame.data.get(KEY_DOCUMENT_ID) {
        Some(Value::String(s)) => Uuid::parse_str(s)
            .map_err(|e| ProtocolError::InvalidField { field: KEY_DOCUMENT_ID, reason: e.to_string() }),
        Some(_) => Err(ProtocolError::InvalidField { field: KEY_DOCUMENT_ID, reason: "expected a string".into() }),
        None => frame.board_id.ok_or(ProtocolError::MissingField(KEY_DOCUMENT_ID)),
    }
}

/// Parse an optional `removedIds` list. Numeric ids are accepted as strings.
///
/// # Errors
///
/// Returns `ProtocolError::InvalidField` when the value is not an array.
pub fn removed_ids(data: &Data) -> Result<Vec<ElementId>, ProtocolError> {
    match data.get(KEY_REMOVED_IDS) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()),
        Some(_) => Err(ProtocolError::InvalidField { field: KEY_REMOVED_IDS, reason: "expected an array".into() }),
    }
}

fn decode_stream(frame: &Frame) -> Result<ClientMessage, ProtocolError> {
    let document_id = document_id(frame)?;
    let mode = match frame.data.get(KEY_MODE) {
        Some(Value::String(s)) => StreamMode::parse(s)
            .ok_or_else(|| ProtocolError::InvalidField { field: KEY_MODE, reason: format!("unknown mode {s}") })?,
        Some(_) => return Err(ProtocolError::InvalidField { field: KEY_MODE, reason: "expected a string".into() }),
        None => return Err(ProtocolError::MissingField(KEY_MODE)),
    };

    match mode {
        StreamMode::Element => {
            if !frame.data.get(KEY_ELEMENT).is_some_and(Value::is_object) {
                return Err(ProtocolError::MissingField(KEY_ELEMENT));
            }
        }
        StreamMode::Snapshot => {
            if !frame.data.get(KEY_ELEMENTS).is_some_and(Value::is_array) {
                return Err(ProtocolError::MissingField(KEY_ELEMENTS));
            }
            removed_ids(&frame.data)?;
        }
    }

    let claimed_sender = frame
        .data
        .get(KEY_SENDER)
        .and_then(Value::as_str)
        .map(str::to_owned);

    Ok(ClientMessage::Stream { document_id, mode, claimed_sender, payload: frame.data.clone() })
}

// =============================================================================
// PAYLOAD BUILDERS
// =============================================================================

/// Join reply: the authoritative snapshot, for the requester only.
#[must_use]
pub fn snapshot_payload(meta: &DocumentMeta, elements: &[Element]) -> Data {
    let mut data = Data::new();
    data.insert(KEY_DOCUMENT_ID.into(), json!(meta.id));
    data.insert(KEY_ELEMENTS.into(), json!(elements));
    data.insert(KEY_METADATA.into(), json!(meta));
    data
}

/// Merged result of a durable update: sender confirmation and peer broadcast.
#[must_use]
pub fn update_applied_payload(document_id: Uuid, elements: &[Element], updated_by: &str, timestamp: i64) -> Data {
    let mut data = Data::new();
    data.insert(KEY_DOCUMENT_ID.into(), json!(document_id));
    data.insert(KEY_ELEMENTS.into(), json!(elements));
    data.insert(KEY_UPDATED_BY.into(), json!(updated_by));
    data.insert(KEY_TIMESTAMP.into(), json!(timestamp));
    data
}

/// Presence payload for `peer:joined` / `peer:left`.
#[must_use]
pub fn peer_payload(document_id: Uuid, peer_id: Uuid, identity: &str) -> Data {
    let mut data = Data::new();
    data.insert(KEY_DOCUMENT_ID.into(), json!(document_id));
    data.insert(KEY_PEER_ID.into(), json!(peer_id));
    data.insert(KEY_IDENTITY.into(), json!(identity));
    data
}

/// Relayed stream payload: the original keys plus the verified sender.
#[must_use]
pub fn relayed_stream_payload(mut payload: Data, sender: &str) -> Data {
    payload.insert(KEY_SENDER.into(), json!(sender));
    payload
}

/// Server notification frame for a document.
#[must_use]
pub fn notification(syscall: &str, document_id: Uuid, data: Data) -> Frame {
    Frame::request(syscall, data).with_board_id(document_id)
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
