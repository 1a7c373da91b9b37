// End-to-end session behaviour over the in-process hub.

use std::sync::Arc;
use std::time::Duration;

use coedit_common::codec::{decode_base64, decode_json_base64, encode_base64};
use coedit_common::presence::{AwarenessUpdate, CursorRange};
use coedit_common::protocol::hub::HubCall;
use coedit_sync::hub::{MemoryHub, MemoryTransport};
use coedit_sync::session::{SessionIdentity, SessionOptions};
use coedit_sync::{spawn_session, ColorPool, ConnectionState, Session, SessionHandle, YDoc};
use tokio::task::JoinHandle;

const WINDOW: Duration = Duration::from_millis(120);

fn identity(user: &str) -> SessionIdentity {
    SessionIdentity {
        team_id: "t1".into(),
        room_id: "r1".into(),
        user_id: user.into(),
        user_name: user.to_uppercase(),
    }
}

struct Peer {
    handle: SessionHandle<YDoc>,
    task: JoinHandle<()>,
    doc: Arc<YDoc>,
}

fn join(hub: &MemoryHub, colors: &ColorPool, user: &str) -> Peer {
    let doc = Arc::new(YDoc::new());
    let session: Session<MemoryTransport, YDoc> = Session::new(
        identity(user),
        hub.transport(user),
        Arc::clone(&doc),
        colors,
        SessionOptions::default(),
    );
    let (handle, task) = spawn_session(session, "tok".into());
    Peer { handle, task, doc }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn awareness_calls(hub: &MemoryHub, user: &str) -> Vec<AwarenessUpdate> {
    hub.calls_from(user)
        .into_iter()
        .filter_map(|entry| match entry.call {
            HubCall::BroadcastAwareness { payload_b64, .. } => decode_json_base64(&payload_b64).ok(),
            _ => None,
        })
        .collect()
}

fn count_calls(hub: &MemoryHub, user: &str, method: &str) -> usize {
    hub.calls_from(user).iter().filter(|entry| entry.call.method() == method).count()
}

#[tokio::test(start_paused = true)]
async fn two_peers_share_text_and_presence_then_leave() {
    let hub = MemoryHub::new();
    let colors = ColorPool::default();
    let alice = join(&hub, &colors, "alice");
    let bob = join(&hub, &colors, "bob");
    assert_eq!(alice.handle.state().await.unwrap(), ConnectionState::Connected);
    assert_eq!(bob.handle.state().await.unwrap(), ConnectionState::Connected);

    alice
        .handle
        .edit(|doc: &YDoc| {
            doc.insert_text(0, "hello");
        })
        .unwrap();
    alice.handle.set_cursor(3, 5).unwrap();
    settle().await;
    assert_eq!(bob.doc.text(), "hello");

    tokio::time::sleep(WINDOW).await;
    let seen_by_bob = bob.handle.participants().await.unwrap();
    let remote = seen_by_bob.iter().find(|p| p.user_id == "alice").expect("alice listed");
    assert_eq!(remote.cursor, Some(CursorRange { from: 3, to: 5 }));
    assert_eq!(remote.display_name, "ALICE");
    assert!(!remote.is_local);

    let seen_by_alice = alice.handle.participants().await.unwrap();
    assert!(seen_by_alice[0].is_local);
    assert_ne!(seen_by_alice[0].color, "", "local user carries its color");

    alice.handle.shutdown().await.unwrap();
    alice.task.await.unwrap();
    settle().await;

    let seen_by_bob = bob.handle.participants().await.unwrap();
    assert!(seen_by_bob.iter().all(|p| p.user_id != "alice"));
    assert_eq!(colors.in_use_count(), 1, "the departed session returned its color");

    bob.handle.shutdown().await.unwrap();
    bob.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn remote_updates_are_not_echoed_back() {
    let hub = MemoryHub::new();
    let colors = ColorPool::default();
    let alice = join(&hub, &colors, "alice");
    let bob = join(&hub, &colors, "bob");
    bob.handle.state().await.unwrap();

    alice
        .handle
        .edit(|doc: &YDoc| {
            doc.insert_text(0, "abc");
        })
        .unwrap();
    settle().await;

    assert_eq!(bob.doc.text(), "abc");
    assert_eq!(count_calls(&hub, "alice", "BroadcastUpdate"), 1);
    assert_eq!(count_calls(&hub, "bob", "BroadcastUpdate"), 0);
}

#[tokio::test(start_paused = true)]
async fn burst_of_cursor_moves_is_one_broadcast() {
    let hub = MemoryHub::new();
    let colors = ColorPool::default();
    let alice = join(&hub, &colors, "alice");
    alice.handle.state().await.unwrap();

    for step in 0..10u32 {
        alice.handle.set_cursor(step, step + 1).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(awareness_calls(&hub, "alice").is_empty(), "still inside the window");

    tokio::time::sleep(WINDOW).await;
    let sent = awareness_calls(&hub, "alice");
    assert_eq!(sent.len(), 1);
    let state = sent[0].entries[0].state.as_ref().expect("presence");
    assert_eq!(state.cursor, Some(CursorRange { from: 9, to: 10 }));
}

#[tokio::test(start_paused = true)]
async fn late_joiner_receives_history_and_sees_idle_peers() {
    let hub = MemoryHub::new();
    let colors = ColorPool::default();
    let alice = join(&hub, &colors, "alice");
    alice.handle.state().await.unwrap();
    alice
        .handle
        .edit(|doc: &YDoc| {
            doc.insert_text(0, "draft");
        })
        .unwrap();
    alice.handle.set_cursor(1, 1).unwrap();
    tokio::time::sleep(WINDOW * 2).await;

    let carol = join(&hub, &colors, "carol");
    carol.handle.state().await.unwrap();
    settle().await;
    assert_eq!(carol.doc.text(), "draft");

    // Alice stays still; announcing carol makes alice repeat the last presence.
    carol.handle.set_cursor(0, 0).unwrap();
    tokio::time::sleep(WINDOW * 3).await;
    let seen = carol.handle.participants().await.unwrap();
    let users: Vec<&str> = seen.iter().map(|p| p.user_id.as_str()).collect();
    assert_eq!(users, vec!["carol", "alice"]);
    assert_eq!(seen[1].cursor, Some(CursorRange { from: 1, to: 1 }));
}

fn seeded_history(count: usize) -> Vec<String> {
    let source = YDoc::with_client_id(42);
    (0..count).map(|i| encode_base64(&source.insert_text(i as u32, "."))).collect()
}

async fn snapshots_after_join_with_history(count: usize) -> (usize, Vec<String>, String) {
    let hub = MemoryHub::new();
    hub.seed_history("t1", "r1", seeded_history(count));
    let colors = ColorPool::default();
    let alice = join(&hub, &colors, "alice");
    alice.handle.state().await.unwrap();
    settle().await;
    let text = alice.doc.text();
    alice.handle.shutdown().await.unwrap();
    (count_calls(&hub, "alice", "SendMergedSnapshot"), hub.history("t1", "r1"), text)
}

#[tokio::test(start_paused = true)]
async fn compaction_triggers_at_threshold_only() {
    let (calls, history, text) = snapshots_after_join_with_history(119).await;
    assert_eq!(calls, 0);
    assert_eq!(history.len(), 119);
    assert_eq!(text.len(), 119);

    let (calls, history, text) = snapshots_after_join_with_history(120).await;
    assert_eq!(calls, 1);
    assert_eq!(history.len(), 1, "hub collapsed history into the snapshot");
    let snapshot = decode_base64(&history[0]).unwrap();
    assert_eq!(YDoc::from_state(&snapshot).unwrap().text(), text);

    let (calls, _, _) = snapshots_after_join_with_history(500).await;
    assert_eq!(calls, 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_rejoins_first_and_resumes_traffic() {
    let hub = MemoryHub::new();
    let colors = ColorPool::default();
    let alice = join(&hub, &colors, "alice");
    let bob = join(&hub, &colors, "bob");
    bob.handle.state().await.unwrap();
    alice.handle.state().await.unwrap();

    let before = hub.calls_from("alice").len();
    hub.set_refuse_connections(true);
    hub.drop_user_connections("alice");
    settle().await;

    alice
        .handle
        .edit(|doc: &YDoc| {
            doc.insert_text(0, "offline");
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(alice.handle.state().await.unwrap(), ConnectionState::Reconnecting);
    assert_eq!(bob.doc.text(), "");

    hub.set_refuse_connections(false);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(alice.handle.state().await.unwrap(), ConnectionState::Connected);

    let after: Vec<HubCall> =
        hub.calls_from("alice").into_iter().skip(before).map(|entry| entry.call).collect();
    assert!(
        matches!(after.first(), Some(HubCall::JoinDocument { .. })),
        "first call on the new connection must be JoinDocument, got {after:?}"
    );
    settle().await;
    assert_eq!(bob.doc.text(), "offline");
}

#[tokio::test(start_paused = true)]
async fn peer_connection_drop_removes_its_presence() {
    let hub = MemoryHub::new();
    let colors = ColorPool::default();
    let alice = join(&hub, &colors, "alice");
    let bob = join(&hub, &colors, "bob");
    bob.handle.state().await.unwrap();
    alice.handle.state().await.unwrap();

    alice.handle.set_cursor(4, 4).unwrap();
    tokio::time::sleep(WINDOW * 2).await;
    assert_eq!(bob.handle.participants().await.unwrap().len(), 1);

    hub.set_refuse_connections(true);
    hub.drop_user_connections("alice");
    settle().await;
    assert!(bob.handle.participants().await.unwrap().is_empty());

    hub.set_refuse_connections(false);
    tokio::time::sleep(Duration::from_secs(3)).await;
    tokio::time::sleep(WINDOW * 2).await;
    let seen = bob.handle.participants().await.unwrap();
    assert_eq!(seen.len(), 1, "the peer reappears after the reconnect rebroadcast");
    assert_eq!(seen[0].cursor, Some(CursorRange { from: 4, to: 4 }));
}
