//! 线上协议事件 / Wire protocol events
//!
//! 每帧一个 JSON 对象，`type` 字段区分事件 / one JSON object per frame, tagged by `type`

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identity::{Identity, Profile};
use super::message::{DeliveryStatus, MessageKind, RetentionMode, StoredMessage};

/// 通话类型 / Call media type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Audio,
    Video,
}

/// 客户端 -> 服务端事件 / Client -> server events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Join {
        room_id: String,
        identity: String,
        device_id: String,
        profile: Profile,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        id: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default, alias = "mediaRef")]
        media_url: Option<String>,
        #[serde(default)]
        message_type: MessageKind,
        #[serde(default)]
        reply_to_id: Option<String>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    Typing { is_typing: bool },
    ProfileUpdate { profile: Profile },
    MessageRead { ids: Vec<String> },
    MessageDelete { id: String },
    EmergencyWipe {},
    #[serde(rename_all = "camelCase")]
    CallRequest {
        #[serde(default)]
        call_type: CallType,
    },
    #[serde(rename_all = "camelCase")]
    CallAccepted {
        #[serde(default)]
        call_type: CallType,
    },
    #[serde(alias = "call-reject")]
    CallRejected {},
    CallEnd {},
    Offer { sdp: Value },
    Answer { sdp: Value },
    IceCandidate { candidate: Value },
    #[serde(rename_all = "camelCase")]
    SyncRequest {
        #[serde(default)]
        target_device_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SyncResponse {
        target_device_id: String,
        #[serde(default)]
        messages: Vec<Value>,
    },
    SetRetention { mode: RetentionMode },
    Ping {},
}

impl ClientEvent {
    /// 已知事件标签 / Known inbound `type` tags
    pub const TAGS: &'static [&'static str] = &[
        "join",
        "chat-message",
        "typing",
        "profile-update",
        "message-read",
        "message-delete",
        "emergency-wipe",
        "call-request",
        "call-accepted",
        "call-rejected",
        "call-reject",
        "call-end",
        "offer",
        "answer",
        "ice-candidate",
        "sync-request",
        "sync-response",
        "set-retention",
        "ping",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::ChatMessage { .. } => "chat-message",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::ProfileUpdate { .. } => "profile-update",
            ClientEvent::MessageRead { .. } => "message-read",
            ClientEvent::MessageDelete { .. } => "message-delete",
            ClientEvent::EmergencyWipe {} => "emergency-wipe",
            ClientEvent::CallRequest { .. } => "call-request",
            ClientEvent::CallAccepted { .. } => "call-accepted",
            ClientEvent::CallRejected {} => "call-rejected",
            ClientEvent::CallEnd {} => "call-end",
            ClientEvent::Offer { .. } => "offer",
            ClientEvent::Answer { .. } => "answer",
            ClientEvent::IceCandidate { .. } => "ice-candidate",
            ClientEvent::SyncRequest { .. } => "sync-request",
            ClientEvent::SyncResponse { .. } => "sync-response",
            ClientEvent::SetRetention { .. } => "set-retention",
            ClientEvent::Ping {} => "ping",
        }
    }
}

/// 气泡归属：相对接收设备 / Bubble side relative to the receiving device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderTag {
    #[serde(rename = "self")]
    Own,
    Peer,
}

impl SenderTag {
    pub fn relative_to(sender: Identity, viewer: Identity) -> Self {
        if sender == viewer {
            SenderTag::Own
        } else {
            SenderTag::Peer
        }
    }
}

/// 下发给客户端的消息视图 / Client-facing message view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    pub timestamp: i64,
    pub status: DeliveryStatus,
    pub sender_identity: Identity,
    pub sender: SenderTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl WireMessage {
    pub fn from_stored(message: &StoredMessage, viewer: Identity) -> Self {
        Self {
            id: message.id.clone(),
            text: message.text.clone(),
            media_url: message.media_ref.clone(),
            message_type: message.kind,
            reply_to_id: message.reply_to_id.clone(),
            timestamp: message.created_at,
            status: message.status,
            sender_identity: message.sender,
            sender: SenderTag::relative_to(message.sender, viewer),
            expires_at: message.expires_at,
        }
    }

    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.status = status;
        self
    }
}

/// 服务端 -> 客户端事件 / Server -> client events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Joined {
        identity: Identity,
        is_initiator: bool,
        peer_online: bool,
        peer_profile: Option<Profile>,
        retention_mode: RetentionMode,
    },
    PeerJoined { identity: Identity, profile: Profile },
    PeerLeft { identity: Identity },
    #[serde(rename_all = "camelCase")]
    Typing { identity: Identity, is_typing: bool },
    ProfileUpdate { identity: Identity, profile: Profile },
    #[serde(rename = "profile_updated")]
    ProfileUpdated { identity: Identity, profile: Profile },
    ChatMessage {
        #[serde(flatten)]
        message: WireMessage,
    },
    MessageStatus {
        ids: Vec<String>,
        status: DeliveryStatus,
    },
    #[serde(rename_all = "camelCase")]
    SyncRequest { target_device_id: String },
    #[serde(rename_all = "camelCase")]
    SyncResponse {
        target_device_id: String,
        messages: Vec<Value>,
    },
    SyncMessages { messages: Vec<WireMessage> },
    MessageDeleted { id: String },
    EmergencyWipe { by: Identity },
    #[serde(rename_all = "camelCase")]
    CallRequest { from: Identity, call_type: CallType },
    #[serde(rename_all = "camelCase")]
    CallAccepted { from: Identity, call_type: CallType },
    CallRejected { from: Identity },
    CallEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<Identity>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Offer { from: Identity, sdp: Value },
    Answer { from: Identity, sdp: Value },
    IceCandidate { from: Identity, candidate: Value },
    RetentionUpdated { mode: RetentionMode },
    Pong { timestamp: i64 },
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_parses_camel_case_fields() {
        let ev: ClientEvent = serde_json::from_value(json!({
            "type": "join", "roomId": "main", "identity": "admin",
            "deviceId": "d1", "profile": {"name": "Ann"}
        }))
        .unwrap();
        assert_eq!(ev.name(), "join");
    }

    #[test]
    fn empty_struct_variants_ignore_extra_fields() {
        let ev: ClientEvent =
            serde_json::from_value(json!({"type": "emergency-wipe", "confirm": true})).unwrap();
        assert_eq!(ev, ClientEvent::EmergencyWipe {});
        let ev: ClientEvent = serde_json::from_value(json!({"type": "call-reject"})).unwrap();
        assert_eq!(ev, ClientEvent::CallRejected {});
    }

    #[test]
    fn chat_message_frame_is_flat_and_tagged() {
        let msg = WireMessage {
            id: "m1".into(),
            text: "hi".into(),
            media_url: None,
            message_type: MessageKind::Text,
            reply_to_id: None,
            timestamp: 7,
            status: DeliveryStatus::Delivered,
            sender_identity: Identity::Admin,
            sender: SenderTag::Peer,
            expires_at: None,
        };
        let v = serde_json::to_value(ServerEvent::ChatMessage { message: msg.clone() }).unwrap();
        assert_eq!(v["type"], "chat-message");
        assert_eq!(v["id"], "m1");
        assert_eq!(v["sender"], "peer");
        assert_eq!(v["status"], "delivered");
        let back: ServerEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, ServerEvent::ChatMessage { message: msg });
    }

    #[test]
    fn profile_updated_keeps_underscore_tag() {
        let v = serde_json::to_value(ServerEvent::ProfileUpdated {
            identity: Identity::Friend,
            profile: Profile::default(),
        })
        .unwrap();
        assert_eq!(v["type"], "profile_updated");
    }

    #[test]
    fn tags_cover_every_variant_name() {
        let samples = [
            ClientEvent::Ping {},
            ClientEvent::CallEnd {},
            ClientEvent::EmergencyWipe {},
            ClientEvent::MessageRead { ids: vec![] },
        ];
        for ev in samples {
            assert!(ClientEvent::TAGS.contains(&ev.name()));
        }
    }
}
