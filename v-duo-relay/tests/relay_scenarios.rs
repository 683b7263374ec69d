use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use v_duo_relay::client::LocalMessageStore;
use v_duo_relay::config::RelayConfig;
use v_duo_relay::domain::{now_ms, Identity, RetentionMode, ServerEvent};
use v_duo_relay::relay::ConnectionState;
use v_duo_relay::storage::SledStore;
use v_duo_relay::RelayServer;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

struct Device {
    state: ConnectionState,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Device {
    async fn join(server: &RelayServer, handle: &str, identity: &str, device_id: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = ConnectionState::new(handle.to_string(), tx, 1000);
        let frame = json!({
            "type": "join", "roomId": "main", "identity": identity,
            "deviceId": device_id, "profile": {"name": identity}
        });
        server.handle_text(&mut state, &frame.to_string()).await;
        Self { state, rx }
    }

    async fn send(&mut self, server: &RelayServer, frame: Value) {
        server.handle_text(&mut self.state, &frame.to_string()).await;
    }

    fn frames(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(Message::Text(text)) = self.rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    fn leave(self, server: &RelayServer) {
        server.on_disconnect(&self.state.handle);
    }
}

fn of_type<'a>(frames: &'a [Value], ty: &str) -> Vec<&'a Value> {
    frames.iter().filter(|f| f["type"] == ty).collect()
}

fn chat(id: &str, text: &str) -> Value {
    json!({"type": "chat-message", "id": id, "text": text, "messageType": "text"})
}

#[tokio::test]
async fn offline_recipient_gets_queued_message_once_then_sender_sees_delivered() {
    let server = RelayServer::in_memory(RelayConfig::default());
    let mut a = Device::join(&server, "a1", "admin", "da").await;
    a.send(&server, chat("m1", "are you there?")).await;
    let statuses: Vec<Value> = of_type(&a.frames(), "message-status").into_iter().cloned().collect();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0]["status"], "sent");

    let mut b = Device::join(&server, "b1", "friend", "db").await;
    let got = b.frames();
    let chats = of_type(&got, "chat-message");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0]["id"], "m1");
    assert_eq!(chats[0]["sender"], "peer");
    assert_eq!(chats[0]["status"], "delivered");

    let a_frames = a.frames();
    let delivered = of_type(&a_frames, "message-status");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["ids"], json!(["m1"]));
    assert_eq!(delivered[0]["status"], "delivered");

    // 第二个设备不再收到同一条排队消息 / a second device does not get the queued message again
    let mut b2 = Device::join(&server, "b2", "friend", "db2").await;
    assert!(of_type(&b2.frames(), "chat-message").is_empty());
}

#[tokio::test]
async fn two_quick_devices_announce_peer_joined_once() {
    let server = RelayServer::in_memory(RelayConfig::default());
    let mut b = Device::join(&server, "b1", "friend", "db").await;
    b.frames();
    let _a1 = Device::join(&server, "a1", "admin", "d1").await;
    let _a2 = Device::join(&server, "a2", "admin", "d2").await;
    assert_eq!(of_type(&b.frames(), "peer-joined").len(), 1);
}

#[tokio::test]
async fn sibling_device_sees_own_message_as_self() {
    let server = RelayServer::in_memory(RelayConfig::default());
    let mut a1 = Device::join(&server, "a1", "admin", "d1").await;
    let mut a2 = Device::join(&server, "a2", "admin", "d2").await;
    let mut b = Device::join(&server, "b1", "friend", "d3").await;
    a2.frames();
    b.frames();

    a1.send(&server, chat("s1", "hello")).await;
    let sibling = a2.frames();
    let chats = of_type(&sibling, "chat-message");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0]["sender"], "self");
    let peer = b.frames();
    assert_eq!(of_type(&peer, "chat-message")[0]["sender"], "peer");
}

#[tokio::test]
async fn retried_message_id_is_stored_and_rendered_once() {
    let server = RelayServer::in_memory(RelayConfig::default());
    let mut a = Device::join(&server, "a1", "admin", "d1").await;
    let mut b = Device::join(&server, "b1", "friend", "d2").await;
    b.frames();
    a.send(&server, chat("dup", "once")).await;
    a.send(&server, chat("dup", "once")).await;

    // 另一条路径（新连接）重发同一 id / resend of the same id from a fresh connection
    let mut a_again = Device::join(&server, "a9", "admin", "d1").await;
    a_again.send(&server, chat("dup", "once")).await;

    assert_eq!(of_type(&b.frames(), "chat-message").len(), 1);
    let history = server.gateway.find_history("main", Identity::Admin).await.unwrap();
    assert_eq!(history.iter().filter(|m| m.id == "dup").count(), 1);
}

#[tokio::test]
async fn twenty_four_hour_sweep_emits_one_deletion_per_device() {
    let server = RelayServer::new(
        RelayConfig::default(),
        Arc::new(SledStore::open_temporary().unwrap()),
    );
    server
        .gateway
        .set_retention_policy("main", RetentionMode::TwentyFourHours, 0)
        .await
        .unwrap();
    let mut a = Device::join(&server, "a1", "admin", "d1").await;
    let mut b = Device::join(&server, "b1", "friend", "d2").await;
    let before = now_ms();
    a.send(&server, chat("day", "x")).await;
    a.frames();
    b.frames();

    let stored = server.gateway.find_message("day").await.unwrap().unwrap();
    let expires_at = stored.expires_at.unwrap();
    assert!(expires_at >= before + DAY_MS);
    assert!(expires_at <= now_ms() + DAY_MS);

    assert_eq!(server.sweep_expired(expires_at - 1).await.unwrap(), 0);
    assert_eq!(server.sweep_expired(expires_at + 1).await.unwrap(), 1);
    assert_eq!(server.sweep_expired(expires_at + 2).await.unwrap(), 0);
    for frames in [a.frames(), b.frames()] {
        let deleted = of_type(&frames, "message-deleted");
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0]["id"], "day");
    }
}

#[tokio::test]
async fn after_both_read_is_deleted_on_next_sweep() {
    let server = RelayServer::in_memory(RelayConfig::default());
    let mut a = Device::join(&server, "a1", "admin", "d1").await;
    let mut b = Device::join(&server, "b1", "friend", "d2").await;
    a.send(&server, json!({"type":"set-retention","mode":"after-both-read"})).await;
    a.send(&server, chat("m2", "burn")).await;
    b.send(&server, json!({"type":"message-read","ids":["m2"]})).await;
    assert_eq!(server.sweep_expired(i64::MAX).await.unwrap(), 0);

    a.send(&server, json!({"type":"message-read","ids":["m2"]})).await;
    let stored = server.gateway.find_message("m2").await.unwrap().unwrap();
    let marked = stored.expires_at.unwrap();
    assert!(!stored.deleted);
    a.frames();
    b.frames();

    assert_eq!(server.sweep_expired(marked).await.unwrap(), 1);
    assert_eq!(of_type(&b.frames(), "message-deleted").len(), 1);
}

#[tokio::test]
async fn deleted_id_is_never_replayed_as_live_message() {
    let server = RelayServer::in_memory(RelayConfig::default());
    let mut a = Device::join(&server, "a1", "admin", "d1").await;
    a.send(&server, chat("gone", "oops")).await;
    a.send(&server, json!({"type":"message-delete","id":"gone"})).await;
    a.send(&server, chat("gone", "oops")).await;
    a.frames();
    a.leave(&server);

    let mut b = Device::join(&server, "b1", "friend", "d2").await;
    let mut a2 = Device::join(&server, "a2", "admin", "d3").await;
    for frames in [b.frames(), a2.frames()] {
        assert!(of_type(&frames, "chat-message").is_empty());
        for sync in of_type(&frames, "sync-messages") {
            assert_eq!(sync["messages"], json!([]));
        }
    }
}

#[tokio::test]
async fn replaying_sync_payload_is_idempotent_on_the_client() {
    let server = RelayServer::in_memory(RelayConfig::default());
    let mut a = Device::join(&server, "a1", "admin", "d1").await;
    for (id, ts) in [("late", 300), ("early", 100), ("mid", 200)] {
        a.send(
            &server,
            json!({"type":"chat-message","id":id,"text":id,"messageType":"text","timestamp":ts}),
        )
        .await;
    }
    let mut a2 = Device::join(&server, "a2", "admin", "d2").await;
    let frames = a2.frames();
    let sync: ServerEvent = serde_json::from_value(of_type(&frames, "sync-messages")[0].clone()).unwrap();

    let mut store = LocalMessageStore::new();
    store.apply_event(&sync);
    let once = store.messages();
    store.apply_event(&sync);
    assert_eq!(store.messages(), once);
    let ids: Vec<_> = once.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["early", "mid", "late"]);
}

#[tokio::test]
async fn peer_left_only_after_last_device_and_call_is_torn_down() {
    let server = RelayServer::in_memory(RelayConfig::default());
    let a1 = Device::join(&server, "a1", "admin", "d1").await;
    let a2 = Device::join(&server, "a2", "admin", "d2").await;
    let mut b = Device::join(&server, "b1", "friend", "d3").await;
    b.send(&server, json!({"type":"call-request","callType":"video"})).await;
    b.frames();

    a1.leave(&server);
    assert!(of_type(&b.frames(), "peer-left").is_empty());
    a2.leave(&server);
    let frames = b.frames();
    assert_eq!(of_type(&frames, "peer-left").len(), 1);
    let ends = of_type(&frames, "call-end");
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0]["reason"], "disconnected");
}
