//! WebSocket handler: bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, verifies the bearer token, generates a peer ID and enters a
//! `select!` loop:
//! - Incoming client frames -> decode + dispatch by message type
//! - Frames fanned out by other peers -> forward to client
//!
//! Handler functions validate, call the canvas service, and return an
//! `Outcome`. The dispatch layer owns all outbound concerns: reply to
//! sender and notification of peers.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade -> send `session:connected` with `peerId` and `identity`
//! 2. Client sends frames -> dispatch -> handler returns Outcome
//! 3. Dispatch applies Outcome (reply / notify / both)
//! 4. Close -> broadcast `peer:left` for every joined canvas -> cleanup
//!
//! A bad frame or a failed operation produces an error reply. Nothing a
//! client sends closes the connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::element::{Element, ElementId};
use crate::frame::{Data, FRAME_CODE, FRAME_MESSAGE, Frame, Status, now_ms};
use crate::protocol::{
    self, CANVAS_STREAM, CANVAS_STREAMED, CANVAS_UPDATED, ClientMessage, GATEWAY_ERROR, KEY_DOCUMENT_ID, PEER_JOINED,
    PEER_LEFT, ProtocolError, SESSION_CONNECTED,
};
use crate::services::canvas::{self, CanvasError};
use crate::services::subscription::{JoinStart, Subscriptions};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what. Handlers never send frames directly.
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Notify peers EXCLUDING sender. No reply to sender.
    /// Used for stream relays (ephemeral, no persistence).
    NotifyPeers { syscall: &'static str, data: Data },
    /// Reply to sender with one payload, notify peers with another syscall.
    ReplyAndNotify { reply: Data, syscall: &'static str, notify: Data },
    /// Nobody hears anything. Throttled streams.
    Silent,
}

/// Per-connection identity handed to every handler.
struct Conn<'a> {
    peer_id: Uuid,
    identity: &'a str,
    tx: &'a mpsc::Sender<Frame>,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.get("token") else {
        return (StatusCode::UNAUTHORIZED, "token required").into_response();
    };

    let identity = match state.identities.verify(token).await {
        Ok(Some(identity)) => identity,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid or expired token").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ws token validation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "token validation error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, identity))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, identity: String) {
    let peer_id = Uuid::new_v4();

    // Per-connection channel for frames fanned out by peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);

    let welcome = Frame::request(SESSION_CONNECTED, Data::new())
        .with_data("peerId", peer_id.to_string())
        .with_data("identity", identity.clone());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%peer_id, identity, "ws: peer connected");

    let mut subs = Subscriptions::new();
    let conn = Conn { peer_id, identity: &identity, tx: &client_tx };

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut subs, &conn, &text).await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    disconnect(&state, &mut subs, peer_id, &identity).await;
    info!(%peer_id, "ws: peer disconnected");
}

/// Implicit leave of every joined canvas. Peers hear `peer:left` before the
/// room entry goes away.
async fn disconnect(state: &AppState, subs: &mut Subscriptions, peer_id: Uuid, identity: &str) {
    for document_id in subs.disconnect() {
        let frame = protocol::notification(PEER_LEFT, document_id, protocol::peer_payload(document_id, peer_id, identity));
        canvas::broadcast(state, document_id, &frame, Some(peer_id)).await;
        canvas::leave(state, document_id, peer_id).await;
    }
    state.throttle.forget(peer_id);
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// This keeps the websocket transport concerns separate from frame handling,
/// so tests can exercise dispatch and fan-out end-to-end.
async fn process_inbound_text(state: &AppState, subs: &mut Subscriptions, conn: &Conn<'_>, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(peer_id = %conn.peer_id, error = %e, "ws: invalid inbound frame");
            let err = ProtocolError::InvalidField { field: "frame", reason: e.to_string() };
            let mut frame = Frame::request(GATEWAY_ERROR, Data::new()).error_from(&err);
            frame.parent_id = None;
            return vec![frame];
        }
    };

    // Stamp the authenticated identity as `from`.
    req.from = Some(conn.identity.to_owned());

    let is_stream = req.syscall == CANVAS_STREAM;
    if !is_stream {
        info!(peer_id = %conn.peer_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");
    }

    let msg = match ClientMessage::from_frame(&req, now_ms()) {
        Ok(msg) => msg,
        Err(e) => return vec![req.error_from(&e)],
    };
    let document_id = msg.document_id();

    let result = match msg {
        ClientMessage::Join { document_id } => handle_join(state, subs, conn, document_id).await,
        ClientMessage::Update { document_id, elements, removed_ids } => {
            handle_update(state, subs, conn, document_id, &elements, &removed_ids).await
        }
        ClientMessage::Stream { document_id, claimed_sender, payload, .. } => {
            handle_stream(state, conn, document_id, claimed_sender.as_deref(), payload).await
        }
        ClientMessage::Leave { document_id } => handle_leave(state, subs, conn, document_id).await,
    };

    // Apply outcome. The dispatch layer owns all outbound logic.
    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::NotifyPeers { syscall, data }) => {
            let frame = protocol::notification(syscall, document_id, data);
            canvas::broadcast(state, document_id, &frame, Some(conn.peer_id)).await;
            vec![]
        }
        Ok(Outcome::ReplyAndNotify { reply, syscall, notify }) => {
            let sender_frame = req.done_with(reply);
            let frame = protocol::notification(syscall, document_id, notify);
            canvas::broadcast(state, document_id, &frame, Some(conn.peer_id)).await;
            vec![sender_frame]
        }
        Ok(Outcome::Silent) => vec![],
        Err(e) => vec![req.error_from(&e)],
    }
}

// =============================================================================
// CANVAS HANDLERS
// =============================================================================

async fn handle_join(
    state: &AppState,
    subs: &mut Subscriptions,
    conn: &Conn<'_>,
    document_id: Uuid,
) -> Result<Outcome, CanvasError> {
    let start = subs.begin_join(document_id);
    let joined = match canvas::join(state, document_id, conn.peer_id, conn.identity, conn.tx.clone()).await {
        Ok(joined) => joined,
        Err(e) => {
            subs.abort_join(document_id);
            return Err(e);
        }
    };
    subs.complete_join(document_id);

    let reply = protocol::snapshot_payload(&joined.document.meta, &joined.document.elements);
    if start == JoinStart::AlreadyJoined || !joined.newly_joined {
        return Ok(Outcome::Reply(reply));
    }
    Ok(Outcome::ReplyAndNotify {
        reply,
        syscall: PEER_JOINED,
        notify: protocol::peer_payload(document_id, conn.peer_id, conn.identity),
    })
}

async fn handle_update(
    state: &AppState,
    subs: &Subscriptions,
    conn: &Conn<'_>,
    document_id: Uuid,
    elements: &[Element],
    removed_ids: &[ElementId],
) -> Result<Outcome, CanvasError> {
    if !subs.is_joined(document_id) {
        return Err(CanvasError::NotJoined(document_id));
    }
    let committed = canvas::apply_durable_update(state, document_id, conn.identity, elements, removed_ids).await?;
    let data = protocol::update_applied_payload(document_id, &committed.elements, conn.identity, now_ms());
    Ok(Outcome::ReplyAndNotify { reply: data.clone(), syscall: CANVAS_UPDATED, notify: data })
}

async fn handle_stream(
    state: &AppState,
    conn: &Conn<'_>,
    document_id: Uuid,
    claimed_sender: Option<&str>,
    payload: Data,
) -> Result<Outcome, CanvasError> {
    match canvas::relay_stream(state, document_id, conn.peer_id, conn.identity, claimed_sender, payload).await? {
        Some(data) => Ok(Outcome::NotifyPeers { syscall: CANVAS_STREAMED, data }),
        None => Ok(Outcome::Silent),
    }
}

async fn handle_leave(
    state: &AppState,
    subs: &mut Subscriptions,
    conn: &Conn<'_>,
    document_id: Uuid,
) -> Result<Outcome, CanvasError> {
    if !subs.leave(document_id) {
        return Err(CanvasError::NotJoined(document_id));
    }
    canvas::leave(state, document_id, conn.peer_id).await;

    let mut reply = Data::new();
    reply.insert(KEY_DOCUMENT_ID.into(), serde_json::json!(document_id));
    Ok(Outcome::ReplyAndNotify {
        reply,
        syscall: PEER_LEFT,
        notify: protocol::peer_payload(document_id, conn.peer_id, conn.identity),
    })
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    let is_stream = frame.syscall == CANVAS_STREAMED || frame.syscall == CANVAS_STREAM;
    if !is_stream || frame.status == Status::Error {
        if frame.status == Status::Error {
            let code = frame
                .data
                .get(FRAME_CODE)
                .and_then(|v| v.as_str())
                .unwrap_or("-");
            let message = frame
                .data
                .get(FRAME_MESSAGE)
                .and_then(|v| v.as_str())
                .unwrap_or("-");
            warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
        } else {
            info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
        }
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
