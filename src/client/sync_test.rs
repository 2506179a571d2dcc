use super::*;
use crate::client::board::Tool;
use crate::client::history::DEFAULT_MAX_DEPTH;
use crate::element::{ElementKind, Point, Style};
use crate::protocol::{peer_payload, snapshot_payload, update_applied_payload};
use crate::store::DocumentMeta;

fn pt(x: f64, y: f64) -> Point {
    Point { x, y }
}

fn client(policy: HistoryPolicy) -> (SyncClient, Uuid) {
    let mut c = SyncClient::new("alice", policy, DEFAULT_MAX_DEPTH, 16);
    let doc = Uuid::new_v4();
    c.join(doc);
    (c, doc)
}

fn meta(doc: Uuid) -> DocumentMeta {
    DocumentMeta {
        id: doc,
        name: "sketch".into(),
        owner: "alice".into(),
        collaborators: vec!["bob".into()],
        revision: 0,
        updated_at: 0,
        last_updated_by: None,
        created_at: 0,
    }
}

fn line(id: &str, to_x: f64, ts: i64) -> Element {
    let mut el = Element::shape(id, ElementKind::Line, pt(0.0, 0.0), pt(to_x, 0.0), &Style::default(), ts);
    el.updated_at = ts;
    el
}

fn ids(elements: &[Element]) -> Vec<&str> {
    elements.iter().map(|e| e.id.as_str()).collect()
}

/// Draw a line `(0,0) -> (50,0)` and return the frames of the whole gesture.
fn draw_line(c: &mut SyncClient, id: &str, ts: i64) -> Vec<Frame> {
    let mut frames = c.handle_local(BoardEvent::SelectTool(Tool::Line), ts);
    frames.extend(c.handle_local(
        BoardEvent::PointerDown { at: pt(0.0, 0.0), style: Style::default(), id: id.into(), ts },
        ts,
    ));
    frames.extend(c.handle_local(BoardEvent::PointerMove { at: pt(50.0, 0.0), ts: ts + 1 }, ts + 1));
    frames.extend(c.handle_local(BoardEvent::PointerUp, ts + 1));
    frames
}

/// Server confirmation of `req` carrying the given merged set.
fn confirm(req: &Frame, doc: Uuid, elements: &[Element], by: &str) -> Frame {
    req.done_with(update_applied_payload(doc, elements, by, 0))
}

fn frame_ids(frame: &Frame, key: &str) -> Vec<String> {
    frame
        .data
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned).or_else(|| v.get("id")?.as_str().map(str::to_owned)))
                .collect()
        })
        .unwrap_or_default()
}

fn streamed(doc: Uuid, sender: &str, mode: &str, payload: &[(&str, Value)]) -> Frame {
    let mut data = Data::new();
    data.insert(KEY_MODE.into(), json!(mode));
    data.insert(KEY_SENDER.into(), json!(sender));
    for (key, value) in payload {
        data.insert((*key).into(), value.clone());
    }
    Frame::request(CANVAS_STREAMED, data).with_board_id(doc)
}

fn view_ids(c: &SyncClient) -> Vec<String> {
    c.board().view().into_iter().map(|e| e.id).collect()
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

#[test]
fn from_config_applies_history_settings() {
    let config = SyncConfig { history_policy: HistoryPolicy::Preserve, history_max_depth: 2, ..SyncConfig::default() };
    let mut c = SyncClient::from_config("alice", &config);
    assert_eq!(c.identity(), "alice");
    assert_eq!(c.board().policy(), HistoryPolicy::Preserve);

    c.join(Uuid::new_v4());
    draw_line(&mut c, "l1", 1000);
    draw_line(&mut c, "l2", 2000);
    draw_line(&mut c, "l3", 3000);
    assert_eq!(c.board().history().len(), 2);
}

#[test]
fn join_request_names_document() {
    let mut c = SyncClient::new("alice", HistoryPolicy::default(), DEFAULT_MAX_DEPTH, 16);
    let doc = Uuid::new_v4();
    let frame = c.join(doc);
    assert_eq!(frame.syscall, CANVAS_JOIN);
    assert_eq!(frame.board_id, Some(doc));
    assert_eq!(frame.data.get(KEY_DOCUMENT_ID), Some(&json!(doc)));
    assert_eq!(c.document_id(), Some(doc));

    let leave = c.leave().expect("joined");
    assert_eq!(leave.syscall, CANVAS_LEAVE);
    assert!(c.leave().is_none());
}

#[test]
fn join_reply_loads_snapshot_and_resets_history() {
    let (mut c, doc) = client(HistoryPolicy::default());
    let join = Frame::request(CANVAS_JOIN, Data::new()).with_board_id(doc);
    let reply = join.done_with(snapshot_payload(&meta(doc), &[line("r1", 100.0, 1000)]));

    let notice = c.handle_inbound(&reply, 5000);
    assert_eq!(notice, Some(SyncNotice::Loaded { count: 1 }));
    assert_eq!(ids(c.board().elements()), vec!["r1"]);
    assert_eq!(ids(c.synced()), vec!["r1"]);
    assert!(!c.board().history().can_undo());
}

#[test]
fn local_events_without_document_send_nothing() {
    let mut c = SyncClient::new("alice", HistoryPolicy::default(), DEFAULT_MAX_DEPTH, 16);
    assert!(draw_line(&mut c, "l1", 1000).is_empty());
    assert_eq!(ids(c.board().elements()), vec!["l1"]);
}

// =============================================================================
// OUTBOUND
// =============================================================================

#[test]
fn drawing_streams_previews_then_commits() {
    let (mut c, doc) = client(HistoryPolicy::default());
    c.handle_local(BoardEvent::SelectTool(Tool::Brush), 1000);

    let first = c.handle_local(
        BoardEvent::PointerDown { at: pt(0.0, 0.0), style: Style::default(), id: "b1".into(), ts: 1000 },
        1000,
    );
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].syscall, CANVAS_STREAM);
    assert_eq!(first[0].data.get(KEY_MODE), Some(&json!("element")));
    assert_eq!(first[0].data.get(KEY_SENDER), Some(&json!("alice")));
    assert_eq!(first[0].data.get(KEY_DOCUMENT_ID), Some(&json!(doc)));

    let throttled = c.handle_local(BoardEvent::PointerMove { at: pt(1.0, 1.0), ts: 1005 }, 1005);
    assert!(throttled.is_empty());

    let next = c.handle_local(BoardEvent::PointerMove { at: pt(2.0, 2.0), ts: 1020 }, 1020);
    assert_eq!(next.len(), 1);
    let points = next[0].data[KEY_ELEMENT]["points"].as_array().map(Vec::len);
    assert_eq!(points, Some(3));

    let commit = c.handle_local(BoardEvent::PointerUp, 1021);
    assert_eq!(commit.len(), 1);
    assert_eq!(commit[0].syscall, CANVAS_UPDATE);
    assert_eq!(frame_ids(&commit[0], KEY_ELEMENTS), vec!["b1"]);
    assert!(frame_ids(&commit[0], KEY_REMOVED_IDS).is_empty());
}

#[test]
fn erase_sends_removed_ids() {
    let (mut c, doc) = client(HistoryPolicy::default());
    let commit = draw_line(&mut c, "l1", 1000).pop().expect("commit");
    c.handle_inbound(&confirm(&commit, doc, &c.board().elements().to_vec(), "alice"), 1002);

    c.handle_local(BoardEvent::SelectTool(Tool::Eraser), 2000);
    let down = c.handle_local(
        BoardEvent::PointerDown { at: pt(25.0, 0.0), style: Style::default(), id: "unused".into(), ts: 2000 },
        2000,
    );
    assert!(down.is_empty());

    let preview = c.handle_local(BoardEvent::PointerMove { at: pt(25.0, 0.0), ts: 2001 }, 2001);
    assert_eq!(preview.len(), 1);
    assert_eq!(preview[0].data.get(KEY_MODE), Some(&json!("snapshot")));
    assert_eq!(frame_ids(&preview[0], KEY_REMOVED_IDS), vec!["l1"]);

    let commit = c.handle_local(BoardEvent::PointerUp, 2002);
    assert_eq!(commit[0].syscall, CANVAS_UPDATE);
    assert!(frame_ids(&commit[0], KEY_ELEMENTS).is_empty());
    assert_eq!(frame_ids(&commit[0], KEY_REMOVED_IDS), vec!["l1"]);
}

#[test]
fn redo_over_newer_remote_edit_is_restamped() {
    let (mut c, doc) = client(HistoryPolicy::Preserve);
    let commit = draw_line(&mut c, "l1", 1000).pop().expect("commit");
    c.handle_inbound(&confirm(&commit, doc, &c.board().elements().to_vec(), "alice"), 1002);

    let remote = Frame::request(CANVAS_UPDATED, update_applied_payload(doc, &[line("l1", 80.0, 5000)], "bob", 5000))
        .with_board_id(doc);
    assert_eq!(
        c.handle_inbound(&remote, 5000),
        Some(SyncNotice::Updated { updated_by: "bob".into(), origin: Origin::Remote })
    );
    assert_eq!(c.board().elements()[0].x2, Some(80.0));

    let undo = c.handle_local(BoardEvent::Undo, 4000);
    assert_eq!(frame_ids(&undo[0], KEY_REMOVED_IDS), vec!["l1"]);

    let redo = c.handle_local(BoardEvent::Redo, 4000);
    let sent = &redo[0].data[KEY_ELEMENTS][0];
    assert_eq!(sent["x2"], json!(50.0));
    assert_eq!(sent["updatedAt"], json!(5001));
    assert!(frame_ids(&redo[0], KEY_REMOVED_IDS).is_empty());
}

#[test]
fn undo_under_preserve_removes_only_own_step() {
    let (mut c, doc) = client(HistoryPolicy::Preserve);
    let commit = draw_line(&mut c, "l1", 1000).pop().expect("commit");
    c.handle_inbound(&confirm(&commit, doc, &c.board().elements().to_vec(), "alice"), 1002);

    let merged = [c.board().elements()[0].clone(), line("bob1", 20.0, 3000)];
    let remote =
        Frame::request(CANVAS_UPDATED, update_applied_payload(doc, &merged, "bob", 3000)).with_board_id(doc);
    c.handle_inbound(&remote, 3000);
    assert_eq!(ids(c.board().elements()), vec!["l1", "bob1"]);

    let undo = c.handle_local(BoardEvent::Undo, 4000);
    assert_eq!(frame_ids(&undo[0], KEY_REMOVED_IDS), vec!["l1"]);
    assert_eq!(frame_ids(&undo[0], KEY_ELEMENTS), vec!["bob1"]);
    assert_eq!(ids(c.board().elements()), vec!["bob1"]);

    let redo = c.handle_local(BoardEvent::Redo, 4001);
    assert_eq!(frame_ids(&redo[0], KEY_ELEMENTS), vec!["l1", "bob1"]);
    assert!(frame_ids(&redo[0], KEY_REMOVED_IDS).is_empty());
}

// =============================================================================
// INBOUND
// =============================================================================

#[test]
fn remote_update_drops_removed_and_keeps_unsynced_drafts() {
    let (mut c, doc) = client(HistoryPolicy::default());
    let join = Frame::request(CANVAS_JOIN, Data::new()).with_board_id(doc);
    c.handle_inbound(&join.done_with(snapshot_payload(&meta(doc), &[line("r1", 10.0, 1000)])), 1000);
    draw_line(&mut c, "mine", 3000);
    assert!(c.board().history().can_undo());

    let remote =
        Frame::request(CANVAS_UPDATED, update_applied_payload(doc, &[], "bob", 2000)).with_board_id(doc);
    c.handle_inbound(&remote, 3005);

    assert_eq!(ids(c.board().elements()), vec!["mine"]);
    assert!(c.synced().is_empty());
    assert!(!c.board().history().can_undo());
}

#[test]
fn own_echo_keeps_history() {
    let (mut c, doc) = client(HistoryPolicy::default());
    let commit = draw_line(&mut c, "l1", 1000).pop().expect("commit");
    let notice = c.handle_inbound(&confirm(&commit, doc, &c.board().elements().to_vec(), "alice"), 1002);
    assert_eq!(notice, Some(SyncNotice::Updated { updated_by: "alice".into(), origin: Origin::Local }));
    assert!(c.board().history().can_undo());
    assert_eq!(ids(c.synced()), vec!["l1"]);
}

#[test]
fn streamed_previews_merge_without_history() {
    let (mut c, doc) = client(HistoryPolicy::default());
    let before = c.board().history().len();

    let frame = streamed(doc, "bob", "element", &[(KEY_ELEMENT, json!(line("peer", 30.0, 1000)))]);
    assert_eq!(c.handle_inbound(&frame, 1000), Some(SyncNotice::Streamed { sender: "bob".into() }));
    assert!(c.board().elements().is_empty());
    assert_eq!(view_ids(&c), vec!["peer"]);
    assert_eq!(c.board().history().len(), before);
    assert!(c.synced().is_empty());

    let own = streamed(doc, "alice", "element", &[(KEY_ELEMENT, json!(line("echo", 30.0, 1000)))]);
    assert!(c.handle_inbound(&own, 1000).is_none());
    assert_eq!(view_ids(&c), vec!["peer"]);
}

#[test]
fn peer_draft_stays_out_of_local_commit() {
    let (mut c, doc) = client(HistoryPolicy::default());
    let frame = streamed(doc, "bob", "element", &[(KEY_ELEMENT, json!(line("bob-draft", 30.0, 1000)))]);
    c.handle_inbound(&frame, 1000);

    let commit = draw_line(&mut c, "mine", 2000).pop().expect("commit");
    assert_eq!(commit.syscall, CANVAS_UPDATE);
    assert_eq!(frame_ids(&commit, KEY_ELEMENTS), vec!["mine"]);
    assert!(frame_ids(&commit, KEY_REMOVED_IDS).is_empty());
    assert_eq!(view_ids(&c), vec!["bob-draft", "mine"]);
}

#[test]
fn peer_erase_preview_never_feeds_removed_ids() {
    let (mut c, doc) = client(HistoryPolicy::default());
    let join = Frame::request(CANVAS_JOIN, Data::new()).with_board_id(doc);
    c.handle_inbound(&join.done_with(snapshot_payload(&meta(doc), &[line("r1", 10.0, 1000)])), 1000);

    let erase = streamed(doc, "bob", "snapshot", &[(KEY_ELEMENTS, json!([])), (KEY_REMOVED_IDS, json!(["r1"]))]);
    c.handle_inbound(&erase, 1500);
    assert_eq!(ids(c.board().elements()), vec!["r1"]);
    assert!(view_ids(&c).is_empty());

    let commit = draw_line(&mut c, "mine", 2000).pop().expect("commit");
    assert_eq!(frame_ids(&commit, KEY_ELEMENTS), vec!["r1", "mine"]);
    assert!(frame_ids(&commit, KEY_REMOVED_IDS).is_empty());
}

#[test]
fn departed_or_committed_peer_leaves_no_preview() {
    let (mut c, doc) = client(HistoryPolicy::default());
    let draft = streamed(doc, "bob", "element", &[(KEY_ELEMENT, json!(line("bob-draft", 30.0, 1000)))]);
    c.handle_inbound(&draft, 1000);
    let left = Frame::request(PEER_LEFT, peer_payload(doc, Uuid::new_v4(), "bob")).with_board_id(doc);
    c.handle_inbound(&left, 1100);
    assert!(view_ids(&c).is_empty());
    assert!(c.board().previews().is_empty());

    c.handle_inbound(&draft, 1200);
    let committed = Frame::request(CANVAS_UPDATED, update_applied_payload(doc, &[line("other", 5.0, 1300)], "bob", 1300))
        .with_board_id(doc);
    c.handle_inbound(&committed, 1300);
    assert_eq!(view_ids(&c), vec!["other"]);
}

#[test]
fn presence_is_tracked() {
    let (mut c, doc) = client(HistoryPolicy::default());
    let peer = Uuid::new_v4();
    let joined = Frame::request(PEER_JOINED, peer_payload(doc, peer, "bob")).with_board_id(doc);
    assert_eq!(
        c.handle_inbound(&joined, 0),
        Some(SyncNotice::PeerJoined { peer_id: peer, identity: "bob".into() })
    );
    assert_eq!(c.peers().get(&peer).map(String::as_str), Some("bob"));

    let left = Frame::request(PEER_LEFT, peer_payload(doc, peer, "bob")).with_board_id(doc);
    assert_eq!(c.handle_inbound(&left, 0), Some(SyncNotice::PeerLeft { peer_id: peer }));
    assert!(c.peers().is_empty());
}

#[test]
fn error_replies_surface_as_failed() {
    let (mut c, doc) = client(HistoryPolicy::default());
    let req = Frame::request(CANVAS_UPDATE, Data::new()).with_board_id(doc);
    let err = req.error_from(&crate::services::canvas::CanvasError::NotJoined(doc));

    let Some(SyncNotice::Failed { syscall, code, retryable, .. }) = c.handle_inbound(&err, 0) else {
        panic!("expected a failure notice");
    };
    assert_eq!(syscall, CANVAS_UPDATE);
    assert_eq!(code, "E_NOT_JOINED");
    assert!(!retryable);
}

#[test]
fn frames_for_other_documents_are_ignored() {
    let (mut c, _doc) = client(HistoryPolicy::default());
    let other = Uuid::new_v4();
    let remote = Frame::request(CANVAS_UPDATED, update_applied_payload(other, &[line("x", 1.0, 1)], "bob", 1))
        .with_board_id(other);
    assert!(c.handle_inbound(&remote, 0).is_none());
    assert!(c.board().elements().is_empty());
}
