//! End-to-end websocket tests against a real listener and the in-memory store.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use sketchsync::config::SyncConfig;
use sketchsync::frame::{Data, Frame, Status};
use sketchsync::protocol::{CANVAS_JOIN, CANVAS_UPDATE, CANVAS_UPDATED, PEER_JOINED, PEER_LEFT, SESSION_CONNECTED};
use sketchsync::routes;
use sketchsync::state::AppState;
use sketchsync::store::memory::MemoryStore;
use sketchsync::store::DocumentStore;
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (SocketAddr, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store.register_token("tok-alice", "alice").await;
    store.register_token("tok-bob", "bob").await;
    let state = AppState::new(store.clone(), store.clone(), SyncConfig::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, routes::app(state))
            .await
            .expect("serve");
    });
    (addr, store)
}

async fn connect(addr: SocketAddr, token: &str) -> Socket {
    let (mut socket, _) = connect_async(format!("ws://{addr}/api/ws?token={token}"))
        .await
        .expect("connect");
    let welcome = next_frame(&mut socket).await;
    assert_eq!(welcome.syscall, SESSION_CONNECTED);
    socket
}

async fn send(socket: &mut Socket, frame: &Frame) {
    let text = serde_json::to_string(frame).expect("serialize");
    socket
        .send(Message::Text(text.into()))
        .await
        .expect("send");
}

async fn next_frame(socket: &mut Socket) -> Frame {
    loop {
        let msg = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("frame timed out")
            .expect("socket open")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("decode frame");
        }
    }
}

async fn join(socket: &mut Socket, document_id: Uuid) -> Frame {
    send(socket, &Frame::request(CANVAS_JOIN, Data::new()).with_data("documentId", document_id.to_string())).await;
    next_frame(socket).await
}

#[tokio::test]
async fn rejects_missing_or_unknown_token() {
    let (addr, _) = start_server().await;
    assert!(connect_async(format!("ws://{addr}/api/ws")).await.is_err());
    assert!(connect_async(format!("ws://{addr}/api/ws?token=nope")).await.is_err());
}

#[tokio::test]
async fn update_from_one_peer_reaches_the_other() {
    let (addr, store) = start_server().await;
    let doc = store.seed("alice", &["bob"], vec![]).await;

    let mut alice = connect(addr, "tok-alice").await;
    let mut bob = connect(addr, "tok-bob").await;

    let reply = join(&mut alice, doc).await;
    assert_eq!(reply.status, Status::Done);
    let reply = join(&mut bob, doc).await;
    assert_eq!(reply.status, Status::Done);

    let joined = next_frame(&mut alice).await;
    assert_eq!(joined.syscall, PEER_JOINED);
    assert_eq!(joined.data["identity"], json!("bob"));

    let update = Frame::request(CANVAS_UPDATE, Data::new())
        .with_data("documentId", doc.to_string())
        .with_data("elements", json!([{ "id": "r1", "type": "rectangle", "createdAt": 1000, "x1": 4, "y1": 4, "x2": 20, "y2": 20 }]));
    send(&mut alice, &update).await;

    let confirm = next_frame(&mut alice).await;
    assert_eq!(confirm.status, Status::Done);
    assert_eq!(confirm.parent_id, Some(update.id));

    let note = next_frame(&mut bob).await;
    assert_eq!(note.syscall, CANVAS_UPDATED);
    assert_eq!(note.data["updatedBy"], json!("alice"));
    assert_eq!(note.data["elements"][0]["id"], json!("r1"));

    let stored = store.load(doc).await.expect("load");
    assert_eq!(stored.meta.revision, 1);
    assert_eq!(stored.elements.len(), 1);

    drop(bob);
    let left = next_frame(&mut alice).await;
    assert_eq!(left.syscall, PEER_LEFT);
}

#[tokio::test]
async fn outsider_join_is_denied_without_closing() {
    let (addr, store) = start_server().await;
    let doc = store.seed("alice", &[], vec![]).await;

    let mut bob = connect(addr, "tok-bob").await;
    let reply = join(&mut bob, doc).await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.error_code(), Some("E_ACCESS_DENIED"));

    let reply = join(&mut bob, Uuid::new_v4()).await;
    assert_eq!(reply.error_code(), Some("E_DOCUMENT_NOT_FOUND"));
}
