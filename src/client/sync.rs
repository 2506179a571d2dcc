//! Sync client: binds a local `BoardState` to the frame protocol.
//!
//! DESIGN
//! ======
//! `SyncClient` is transport-free. Local input goes through `handle_local`,
//! which applies it to the board and returns the frames to send; inbound
//! frames go through `handle_inbound`, which folds them into the board and
//! reports what happened as a `SyncNotice`. The caller owns the socket.
//!
//! `synced` is the last element set the server confirmed. Durable updates
//! carry the full current set plus `removedIds = synced - current`, so a
//! local delete is never mistaken for an element the batch merely omitted.
//! An edit that restores older content (undo, redo) is re-stamped with the
//! event time; otherwise last-writer-wins would keep the newer server copy.
//!
//! Streams are previews. They are throttled per client, carry no history,
//! and a dropped stream costs nothing because the commit that follows is
//! durable. Inbound streams land in the board's per-sender previews, never
//! in the live list, so nothing a peer has not committed can ride along in
//! this client's durable updates or their `removedIds`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Value, json};
use uuid::Uuid;

use crate::client::board::{BoardEvent, BoardState, HistoryPolicy, Origin, ToolAction};
use crate::config::SyncConfig;
use crate::element::{Element, ElementId, normalize, normalize_all};
use crate::frame::{Data, FRAME_CODE, FRAME_MESSAGE, FRAME_RETRYABLE, Frame, Status};
use crate::protocol::{
    self, CANVAS_JOIN, CANVAS_LEAVE, CANVAS_STREAM, CANVAS_STREAMED, CANVAS_UPDATE, CANVAS_UPDATED, KEY_DOCUMENT_ID,
    KEY_ELEMENT, KEY_ELEMENTS, KEY_IDENTITY, KEY_MODE, KEY_PEER_ID, KEY_REMOVED_IDS, KEY_SENDER, KEY_TIMESTAMP,
    KEY_UPDATED_BY, PEER_JOINED, PEER_LEFT, StreamMode,
};
use crate::rate_limit::IntervalGate;

// =============================================================================
// TYPES
// =============================================================================

/// What an inbound frame changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// Join reply: the board now holds the authoritative snapshot.
    Loaded { count: usize },
    /// A durable update was folded in.
    Updated { updated_by: String, origin: Origin },
    /// A peer's preview was folded in.
    Streamed { sender: String },
    PeerJoined { peer_id: Uuid, identity: String },
    PeerLeft { peer_id: Uuid },
    /// The server rejected a request.
    Failed { syscall: String, code: String, message: String, retryable: bool },
}

pub struct SyncClient {
    identity: String,
    document_id: Option<Uuid>,
    board: BoardState,
    synced: Arc<[Element]>,
    gate: IntervalGate,
    peers: BTreeMap<Uuid, String>,
}

impl SyncClient {
    #[must_use]
    pub fn new(identity: impl Into<String>, policy: HistoryPolicy, max_history: usize, stream_min_interval_ms: u64) -> Self {
        Self {
            identity: identity.into(),
            document_id: None,
            board: BoardState::new(policy, max_history),
            synced: Arc::from(Vec::new()),
            gate: IntervalGate::new(stream_min_interval_ms),
            peers: BTreeMap::new(),
        }
    }

    /// Client using the configured history policy, depth and stream interval.
    #[must_use]
    pub fn from_config(identity: impl Into<String>, config: &SyncConfig) -> Self {
        let stream_min_interval_ms = u64::try_from(config.stream_min_interval.as_millis()).unwrap_or(u64::MAX);
        Self::new(identity, config.history_policy, config.history_max_depth, stream_min_interval_ms)
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn document_id(&self) -> Option<Uuid> {
        self.document_id
    }

    #[must_use]
    pub fn board(&self) -> &BoardState {
        &self.board
    }

    /// Last server-confirmed element set.
    #[must_use]
    pub fn synced(&self) -> &[Element] {
        &self.synced
    }

    /// Other joined peers: `peer_id` -> identity.
    #[must_use]
    pub fn peers(&self) -> &BTreeMap<Uuid, String> {
        &self.peers
    }
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

impl SyncClient {
    /// Request to join `document_id`. Replaces any previous document.
    pub fn join(&mut self, document_id: Uuid) -> Frame {
        self.document_id = Some(document_id);
        self.synced = Arc::from(Vec::new());
        self.peers.clear();
        self.gate.reset();
        request(CANVAS_JOIN, document_id, Data::new())
    }

    /// Request to leave the current document, if any.
    pub fn leave(&mut self) -> Option<Frame> {
        let document_id = self.document_id.take()?;
        self.peers.clear();
        Some(request(CANVAS_LEAVE, document_id, Data::new()))
    }
}

// =============================================================================
// LOCAL INPUT
// =============================================================================

impl SyncClient {
    /// Apply a local event and return the frames it produces.
    pub fn handle_local(&mut self, event: BoardEvent, now: i64) -> Vec<Frame> {
        let prev_action = self.board.action();
        let prev_elements = Arc::clone(self.board.elements());
        let kind = EventKind::of(&event);

        let board = std::mem::take(&mut self.board);
        self.board = board.apply(event);

        let Some(document_id) = self.document_id else {
            return Vec::new();
        };
        let changed = !Arc::ptr_eq(&prev_elements, self.board.elements());

        let commit = match kind {
            EventKind::PointerUp => matches!(prev_action, ToolAction::Drawing | ToolAction::Erasing),
            EventKind::CommitText => prev_action == ToolAction::Writing && self.board.action() == ToolAction::None,
            EventKind::UndoRedo => changed,
            EventKind::Pointer | EventKind::Other => false,
        };
        if commit {
            self.gate.reset();
            return vec![self.durable_update(document_id, now)];
        }

        if kind != EventKind::Pointer || !changed {
            return Vec::new();
        }
        match self.board.action() {
            ToolAction::Drawing => {
                let Some(element) = self.board.drafting().cloned() else {
                    return Vec::new();
                };
                if !self.gate.allow(now) {
                    return Vec::new();
                }
                let mut data = self.stream_data(StreamMode::Element, now);
                data.insert(KEY_ELEMENT.into(), json!(element));
                vec![request(CANVAS_STREAM, document_id, data)]
            }
            ToolAction::Erasing => {
                if !self.gate.allow(now) {
                    return Vec::new();
                }
                let mut data = self.stream_data(StreamMode::Snapshot, now);
                data.insert(KEY_ELEMENTS.into(), json!(&self.board.elements()[..]));
                data.insert(KEY_REMOVED_IDS.into(), json!(self.removed_since_sync()));
                vec![request(CANVAS_STREAM, document_id, data)]
            }
            ToolAction::None | ToolAction::Writing => Vec::new(),
        }
    }

    fn stream_data(&self, mode: StreamMode, now: i64) -> Data {
        let mut data = Data::new();
        data.insert(KEY_MODE.into(), json!(mode.as_str()));
        data.insert(KEY_SENDER.into(), json!(self.identity));
        data.insert(KEY_TIMESTAMP.into(), json!(now));
        data
    }

    fn removed_since_sync(&self) -> Vec<ElementId> {
        let current: HashSet<&str> = self.board.elements().iter().map(|el| el.id.as_str()).collect();
        self.synced
            .iter()
            .filter(|el| !current.contains(el.id.as_str()))
            .map(|el| el.id.clone())
            .collect()
    }

    fn durable_update(&self, document_id: Uuid, now: i64) -> Frame {
        let synced: HashMap<&str, &Element> = self.synced.iter().map(|el| (el.id.as_str(), el)).collect();
        let elements: Vec<Element> = self
            .board
            .elements()
            .iter()
            .map(|el| match synced.get(el.id.as_str()) {
                Some(prev) if !el.same_content(prev) && el.effective_updated_at() <= prev.effective_updated_at() => {
                    let mut restamped = el.clone();
                    restamped.updated_at = now.max(prev.effective_updated_at() + 1);
                    restamped
                }
                _ => el.clone(),
            })
            .collect();

        let mut data = Data::new();
        data.insert(KEY_ELEMENTS.into(), json!(elements));
        data.insert(KEY_REMOVED_IDS.into(), json!(self.removed_since_sync()));
        data.insert(KEY_TIMESTAMP.into(), json!(now));
        request(CANVAS_UPDATE, document_id, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Pointer,
    PointerUp,
    CommitText,
    UndoRedo,
    Other,
}

impl EventKind {
    fn of(event: &BoardEvent) -> Self {
        match event {
            BoardEvent::PointerDown { .. } | BoardEvent::PointerMove { .. } => Self::Pointer,
            BoardEvent::PointerUp => Self::PointerUp,
            BoardEvent::CommitText { .. } => Self::CommitText,
            BoardEvent::Undo | BoardEvent::Redo => Self::UndoRedo,
            _ => Self::Other,
        }
    }
}

// =============================================================================
// INBOUND
// =============================================================================

impl SyncClient {
    /// Fold one server frame into the board. Frames for other documents
    /// and this client's own relayed streams are ignored.
    pub fn handle_inbound(&mut self, frame: &Frame, now: i64) -> Option<SyncNotice> {
        let document_id = self.document_id?;
        if frame_document(frame).is_some_and(|id| id != document_id) {
            return None;
        }

        if frame.status == Status::Error {
            return Some(SyncNotice::Failed {
                syscall: frame.syscall.clone(),
                code: str_field(&frame.data, FRAME_CODE).unwrap_or("-").to_owned(),
                message: str_field(&frame.data, FRAME_MESSAGE).unwrap_or_default().to_owned(),
                retryable: frame
                    .data
                    .get(FRAME_RETRYABLE)
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            });
        }

        match (frame.syscall.as_str(), frame.status) {
            (CANVAS_JOIN, Status::Done) => {
                let elements = elements_field(&frame.data, now);
                let count = elements.len();
                self.synced = Arc::from(elements.clone());
                self.apply(BoardEvent::LoadSnapshot { elements });
                Some(SyncNotice::Loaded { count })
            }
            (CANVAS_UPDATE, Status::Done) | (CANVAS_UPDATED, Status::Request) => {
                let elements = elements_field(&frame.data, now);
                let updated_by = str_field(&frame.data, KEY_UPDATED_BY)
                    .unwrap_or_default()
                    .to_owned();
                let origin = if updated_by == self.identity { Origin::Local } else { Origin::Remote };

                // The payload is the whole merged set: anything confirmed
                // before and missing now was removed by someone.
                let present: HashSet<&str> = elements.iter().map(|el| el.id.as_str()).collect();
                let removed_ids: Vec<ElementId> = self
                    .synced
                    .iter()
                    .filter(|el| !present.contains(el.id.as_str()))
                    .map(|el| el.id.clone())
                    .collect();

                self.synced = Arc::from(elements.clone());
                self.apply(BoardEvent::MergeRemote { elements, removed_ids, origin });
                if origin == Origin::Remote {
                    self.apply(BoardEvent::ClearPreview { sender: updated_by.clone() });
                }
                Some(SyncNotice::Updated { updated_by, origin })
            }
            (CANVAS_STREAMED, Status::Request) => {
                let sender = str_field(&frame.data, KEY_SENDER).unwrap_or_default().to_owned();
                if sender == self.identity {
                    return None;
                }
                let event = match str_field(&frame.data, KEY_MODE) {
                    Some("element") => {
                        let element = normalize(frame.data.get(KEY_ELEMENT)?, now).ok()?;
                        BoardEvent::PreviewElement { sender: sender.clone(), element }
                    }
                    Some("snapshot") => BoardEvent::PreviewSnapshot {
                        sender: sender.clone(),
                        elements: elements_field(&frame.data, now),
                        removed_ids: protocol::removed_ids(&frame.data).unwrap_or_default(),
                    },
                    _ => return None,
                };
                self.apply(event);
                Some(SyncNotice::Streamed { sender })
            }
            (PEER_JOINED, Status::Request) => {
                let peer_id = uuid_field(&frame.data, KEY_PEER_ID)?;
                let identity = str_field(&frame.data, KEY_IDENTITY).unwrap_or_default().to_owned();
                self.peers.insert(peer_id, identity.clone());
                Some(SyncNotice::PeerJoined { peer_id, identity })
            }
            (PEER_LEFT, Status::Request) => {
                let peer_id = uuid_field(&frame.data, KEY_PEER_ID)?;
                let identity = self
                    .peers
                    .remove(&peer_id)
                    .or_else(|| str_field(&frame.data, KEY_IDENTITY).map(str::to_owned));
                // A gesture cut off by disconnect leaves nothing behind,
                // unless the same identity is still present on another peer.
                if let Some(sender) = identity {
                    if !self.peers.values().any(|other| *other == sender) {
                        self.apply(BoardEvent::ClearPreview { sender });
                    }
                }
                Some(SyncNotice::PeerLeft { peer_id })
            }
            _ => None,
        }
    }

    fn apply(&mut self, event: BoardEvent) {
        let board = std::mem::take(&mut self.board);
        self.board = board.apply(event);
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn request(syscall: &str, document_id: Uuid, mut data: Data) -> Frame {
    data.insert(KEY_DOCUMENT_ID.into(), json!(document_id));
    Frame::request(syscall, data).with_board_id(document_id)
}

fn frame_document(frame: &Frame) -> Option<Uuid> {
    uuid_field(&frame.data, KEY_DOCUMENT_ID).or(frame.board_id)
}

fn str_field<'a>(data: &'a Data, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

fn uuid_field(data: &Data, key: &str) -> Option<Uuid> {
    str_field(data, key).and_then(|s| Uuid::parse_str(s).ok())
}

fn elements_field(data: &Data, now: i64) -> Vec<Element> {
    match data.get(KEY_ELEMENTS) {
        Some(Value::Array(items)) => normalize_all(items, now),
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
