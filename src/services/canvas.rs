//! Canvas coordinator: join/leave, durable updates, stream relay, fan-out.
//!
//! DESIGN
//! ======
//! The store owns the authoritative element collection. This service reads
//! it (through the snapshot cache), merges incoming batches against it, and
//! writes the result back under the document's revision guard. Rooms in
//! `AppState` only track who is joined so frames can be fanned out.
//!
//! Functions here validate and mutate; they never send frames to the caller.
//! The websocket and REST layers decide who receives what.
//!
//! ERROR HANDLING
//! ==============
//! Access denied and not found are returned before any state changes. A
//! persistence failure invalidates the cached snapshot and is returned to the
//! caller without a merged result, so nothing unconfirmed is ever broadcast.
//! Revision conflicts (another writer moved the document) reload, re-merge
//! and retry up to `persist_conflict_retries` times.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::element::{Element, ElementId};
use crate::frame::{Data, ErrorCode, Frame};
use crate::merge::merge_with_removals;
use crate::protocol::relayed_stream_payload;
use crate::state::{AppState, Peer};
use crate::store::{Document, DocumentMeta, StoreError};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    #[error("access denied to canvas {0}")]
    AccessDenied(Uuid),
    #[error("canvas not found: {0}")]
    NotFound(Uuid),
    #[error("not joined to canvas {0}")]
    NotJoined(Uuid),
    #[error("stream sender {claimed} does not match the authenticated identity")]
    SenderMismatch { claimed: String },
    #[error("persistence failed: {0}")]
    Persistence(StoreError),
}

impl ErrorCode for CanvasError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::AccessDenied(_) | Self::SenderMismatch { .. } => "E_ACCESS_DENIED",
            Self::NotFound(_) => "E_DOCUMENT_NOT_FOUND",
            Self::NotJoined(_) => "E_NOT_JOINED",
            Self::Persistence(_) => "E_PERSISTENCE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

impl CanvasError {
    fn from_store(id: Uuid, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound(id),
            StoreError::NotOwner => Self::AccessDenied(id),
            other => Self::Persistence(other),
        }
    }
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct Joined {
    pub document: Arc<Document>,
    /// False when the peer was already in the room.
    pub newly_joined: bool,
}

/// A merged and persisted element collection.
#[derive(Debug, Clone)]
pub struct Committed {
    pub meta: DocumentMeta,
    pub elements: Vec<Element>,
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Current authoritative document, from cache or store.
///
/// # Errors
///
/// `NotFound` for unknown documents, `Persistence` when the store fails.
pub async fn load_snapshot(state: &AppState, document_id: Uuid) -> Result<Arc<Document>, CanvasError> {
    if let Some(doc) = state.cache.get(document_id) {
        return Ok(doc);
    }
    let doc = Arc::new(
        state
            .store
            .load(document_id)
            .await
            .map_err(|e| CanvasError::from_store(document_id, e))?,
    );
    state.cache.put(Arc::clone(&doc));
    Ok(doc)
}

/// Check the access predicate against the store.
///
/// # Errors
///
/// `AccessDenied`, `NotFound`, or `Persistence`.
pub async fn authorize(state: &AppState, document_id: Uuid, identity: &str) -> Result<(), CanvasError> {
    match state.store.authorize(identity, document_id).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(CanvasError::AccessDenied(document_id)),
        Err(e) => Err(CanvasError::from_store(document_id, e)),
    }
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

/// Authorize, load the snapshot, and register the peer for fan-out.
///
/// # Errors
///
/// `AccessDenied` or `NotFound` leave the room untouched.
pub async fn join(
    state: &AppState,
    document_id: Uuid,
    peer_id: Uuid,
    identity: &str,
    tx: mpsc::Sender<Frame>,
) -> Result<Joined, CanvasError> {
    authorize(state, document_id, identity).await?;
    let document = load_snapshot(state, document_id).await?;

    let mut rooms = state.rooms.write().await;
    let room = rooms.entry(document_id).or_default();
    let newly_joined = !room.peers.contains_key(&peer_id);
    room.peers
        .insert(peer_id, Peer { identity: identity.to_owned(), tx });

    info!(%document_id, %peer_id, identity, peers = room.peers.len(), newly_joined, "peer joined canvas");
    Ok(Joined { document, newly_joined })
}

/// Remove the peer from the room. Returns false when it was not joined.
pub async fn leave(state: &AppState, document_id: Uuid, peer_id: Uuid) -> bool {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(&document_id) else {
        return false;
    };
    let removed = room.peers.remove(&peer_id).is_some();
    let remaining = room.peers.len();
    if remaining == 0 {
        rooms.remove(&document_id);
        drop(rooms);
        state.release_commit_lock(document_id);
        info!(%document_id, "evicted empty room");
    }
    if removed {
        info!(%document_id, %peer_id, remaining, "peer left canvas");
    }
    removed
}

/// Whether `peer_id` is registered in the document's room.
pub async fn is_joined(state: &AppState, document_id: Uuid, peer_id: Uuid) -> bool {
    state
        .rooms
        .read()
        .await
        .get(&document_id)
        .is_some_and(|room| room.peers.contains_key(&peer_id))
}

// =============================================================================
// DURABLE UPDATE
// =============================================================================

/// Re-authorize, merge `incoming` and `removed_ids` into the authoritative
/// copy, and persist. The caller fans out the returned result.
///
/// # Errors
///
/// `AccessDenied`, `NotFound`, or `Persistence` (nothing was committed).
pub async fn apply_durable_update(
    state: &AppState,
    document_id: Uuid,
    identity: &str,
    incoming: &[Element],
    removed_ids: &[ElementId],
) -> Result<Committed, CanvasError> {
    authorize(state, document_id, identity).await?;

    let lock = state.commit_lock(document_id);
    let _guard = lock.lock().await;

    let mut attempt = 0;
    loop {
        let base = load_snapshot(state, document_id).await?;
        let merged = merge_with_removals(&base.elements, incoming, removed_ids);

        match state
            .store
            .persist(document_id, &merged, identity, base.meta.revision)
            .await
        {
            Ok(meta) => {
                info!(
                    %document_id,
                    identity,
                    revision = meta.revision,
                    count = merged.len(),
                    "canvas update committed"
                );
                state
                    .cache
                    .put(Arc::new(Document { meta: meta.clone(), elements: merged.clone() }));
                return Ok(Committed { meta, elements: merged });
            }
            Err(StoreError::Conflict { expected, actual, .. }) if attempt < state.config.persist_conflict_retries => {
                attempt += 1;
                warn!(%document_id, expected, actual, attempt, "revision conflict; reloading");
                state.cache.invalidate(document_id);
            }
            Err(e) => {
                tracing::error!(%document_id, identity, error = %e, "canvas update not persisted");
                state.cache.invalidate(document_id);
                return Err(CanvasError::from_store(document_id, e));
            }
        }
    }
}

// =============================================================================
// STREAM RELAY
// =============================================================================

/// Validate a stream payload for relay. `Ok(None)` means the send was
/// throttled and must be dropped silently.
///
/// # Errors
///
/// `NotJoined` or `SenderMismatch`.
pub async fn relay_stream(
    state: &AppState,
    document_id: Uuid,
    peer_id: Uuid,
    identity: &str,
    claimed_sender: Option<&str>,
    payload: Data,
) -> Result<Option<Data>, CanvasError> {
    if !is_joined(state, document_id, peer_id).await {
        return Err(CanvasError::NotJoined(document_id));
    }
    if let Some(claimed) = claimed_sender {
        if claimed != identity {
            return Err(CanvasError::SenderMismatch { claimed: claimed.to_owned() });
        }
    }
    if !state.throttle.allow(peer_id) {
        return Ok(None);
    }
    Ok(Some(relayed_stream_payload(payload, identity)))
}

// =============================================================================
// CANVAS MANAGEMENT
// =============================================================================

/// Create an empty canvas owned by `owner`.
///
/// # Errors
///
/// `Persistence` when the store fails.
pub async fn create_canvas(state: &AppState, owner: &str, name: &str) -> Result<DocumentMeta, CanvasError> {
    let meta = state
        .store
        .create(owner, name)
        .await
        .map_err(CanvasError::Persistence)?;
    info!(document_id = %meta.id, owner, "canvas created");
    Ok(meta)
}

/// Grant `collaborator` access. Only the owner may share.
///
/// # Errors
///
/// `AccessDenied` for non-owners, `NotFound`, or `Persistence`.
pub async fn share_canvas(
    state: &AppState,
    document_id: Uuid,
    owner: &str,
    collaborator: &str,
) -> Result<DocumentMeta, CanvasError> {
    let meta = state
        .store
        .share(document_id, owner, collaborator)
        .await
        .map_err(|e| CanvasError::from_store(document_id, e))?;
    state.cache.invalidate(document_id);
    info!(%document_id, collaborator, "canvas shared");
    Ok(meta)
}

/// Canvases `identity` can open, most recently updated first.
///
/// # Errors
///
/// `Persistence` when the store fails.
pub async fn list_canvases(state: &AppState, identity: &str) -> Result<Vec<DocumentMeta>, CanvasError> {
    state
        .store
        .list(identity)
        .await
        .map_err(CanvasError::Persistence)
}

/// Delete a canvas. Peers still in its room get `NotFound` on their next request.
///
/// # Errors
///
/// `AccessDenied` for non-owners, `NotFound`, or `Persistence`.
pub async fn delete_canvas(state: &AppState, document_id: Uuid, owner: &str) -> Result<(), CanvasError> {
    state
        .store
        .delete(document_id, owner)
        .await
        .map_err(|e| CanvasError::from_store(document_id, e))?;
    state.cache.invalidate(document_id);
    info!(%document_id, owner, "canvas deleted");
    Ok(())
}

// =============================================================================
// FAN-OUT
// =============================================================================

/// Send `frame` to every peer of the document except `exclude`.
pub async fn broadcast(state: &AppState, document_id: Uuid, frame: &Frame, exclude: Option<Uuid>) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(&document_id) else {
        return;
    };

    for (peer_id, peer) in &room.peers {
        if exclude == Some(*peer_id) {
            continue;
        }
        // Best-effort: if a peer's channel is full, skip it.
        let _ = peer.tx.try_send(frame.clone());
    }
}

#[cfg(test)]
#[path = "canvas_test.rs"]
mod tests;
