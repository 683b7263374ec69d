//! 消息中继引擎 / Message relay engine
//!
//! 每个连接一个 [`ConnectionState`]，入站帧在其读循环内顺序处理。
//! One [`ConnectionState`] per connection; inbound frames are handled sequentially by its read loop.

pub mod dedup;
pub mod fanout;
pub mod validate;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::domain::{
    now_ms, ClientEvent, DeliveryStatus, Identity, Profile, RetentionMode, ServerEvent,
};
use crate::error::{RelayError, RelayResult};
use crate::registry::{DeviceSession, RoomSnapshot};
use crate::server::RelayServer;
use crate::service::calls;
use crate::storage::AppendOutcome;

pub use dedup::DedupSet;
pub use fanout::{Audience, Outbound};
use validate::ChatDraft;

/// 连接阶段 / Connection phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Connected,
    Joined {
        room_id: String,
        identity: Identity,
        device_id: String,
    },
}

/// 单连接状态机 / Per-connection state machine
pub struct ConnectionState {
    pub handle: String,
    pub sender: mpsc::UnboundedSender<Message>,
    pub phase: Phase,
    pub dedup: DedupSet,
}

impl ConnectionState {
    pub fn new(handle: String, sender: mpsc::UnboundedSender<Message>, dedup_capacity: usize) -> Self {
        Self {
            handle,
            sender,
            phase: Phase::Connected,
            dedup: DedupSet::new(dedup_capacity),
        }
    }

    /// 已加入的 (房间, 身份) / Joined (room, identity)
    pub fn joined(&self) -> RelayResult<(String, Identity)> {
        match &self.phase {
            Phase::Joined {
                room_id, identity, ..
            } => Ok((room_id.clone(), *identity)),
            Phase::Connected => Err(RelayError::NotJoined),
        }
    }

    /// 直接回复本连接 / Reply on this connection only
    pub fn reply(&self, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(text) => {
                if self.sender.send(Message::Text(text)).is_err() {
                    debug!("reply dropped, connection {} closed", self.handle);
                }
            }
            Err(e) => warn!("failed to encode reply: {}", e),
        }
    }
}

/// 解析入站帧；未知类型显式拒绝 / Parse an inbound frame, rejecting unknown tags explicitly
pub fn parse_event(text: &str) -> RelayResult<ClientEvent> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| RelayError::malformed(format!("invalid json: {}", e)))?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::malformed("missing type"))?;
    if !ClientEvent::TAGS.contains(&tag) {
        return Err(RelayError::UnknownEvent(tag.to_string()));
    }
    let tag = tag.to_string();
    serde_json::from_value(value).map_err(|e| RelayError::malformed(format!("{}: {}", tag, e)))
}

impl RelayServer {
    /// 处理一帧文本；协议错误回 `error`，不断开连接
    /// Handle one text frame; protocol errors answer with `error` and keep the connection
    pub async fn handle_text(&self, state: &mut ConnectionState, text: &str) {
        debug!("📨 Received text from {}: {}", state.handle, text);
        let result = match parse_event(text) {
            Ok(event) => self.handle_event(state, event).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("⚠️  Rejected event from {}: {}", state.handle, e);
            state.reply(&e.to_event());
        }
    }

    pub async fn handle_event(
        &self,
        state: &mut ConnectionState,
        event: ClientEvent,
    ) -> RelayResult<()> {
        match event {
            ClientEvent::Join {
                room_id,
                identity,
                device_id,
                profile,
            } => self.on_join(state, &room_id, &identity, device_id, profile).await,
            ClientEvent::Ping {} => {
                state.reply(&ServerEvent::Pong { timestamp: now_ms() });
                Ok(())
            }
            ClientEvent::ChatMessage {
                id,
                text,
                media_url,
                message_type,
                reply_to_id,
                timestamp,
            } => {
                let draft = ChatDraft {
                    id,
                    text,
                    media_url,
                    kind: message_type,
                    reply_to_id,
                    timestamp,
                };
                self.on_chat(state, draft).await
            }
            ClientEvent::Typing { is_typing } => {
                let (room, identity) = state.joined()?;
                self.dispatch(
                    &room,
                    vec![Outbound::new(
                        Audience::Identity(identity.peer()),
                        ServerEvent::Typing {
                            identity,
                            is_typing,
                        },
                    )],
                );
                Ok(())
            }
            ClientEvent::ProfileUpdate { profile } => self.on_profile_update(state, profile),
            ClientEvent::MessageRead { ids } => self.on_read(state, ids).await,
            ClientEvent::MessageDelete { id } => self.on_delete(state, id).await,
            ClientEvent::EmergencyWipe {} => self.on_wipe(state).await,
            ClientEvent::SetRetention { mode } => self.on_set_retention(state, mode).await,
            ClientEvent::SyncRequest { target_device_id } => {
                self.on_sync_request(state, target_device_id)
            }
            ClientEvent::SyncResponse {
                target_device_id,
                messages,
            } => self.on_sync_response(state, target_device_id, messages),
            ClientEvent::CallRequest { call_type } => {
                let (room, identity) = state.joined()?;
                let snapshot = self.registry.snapshot(&room);
                let out = match self.calls.request(&snapshot, &state.handle, identity, call_type) {
                    Err(err @ RelayError::PeerUnreachable(_)) => {
                        debug!("📵 {}", err);
                        vec![calls::ended_for(&state.handle, "unavailable")]
                    }
                    other => other?,
                };
                self.deliver(&snapshot, out);
                Ok(())
            }
            ClientEvent::CallAccepted { call_type } => {
                let (room, identity) = state.joined()?;
                let out = self.calls.accept(&room, &state.handle, identity, call_type)?;
                self.dispatch(&room, out);
                Ok(())
            }
            ClientEvent::CallRejected {} => {
                let (room, identity) = state.joined()?;
                let out = self.calls.reject(&room, identity);
                self.dispatch(&room, out);
                Ok(())
            }
            ClientEvent::CallEnd {} => {
                let (room, identity) = state.joined()?;
                let out = self.calls.end(&room, identity, None);
                self.dispatch(&room, out);
                Ok(())
            }
            ClientEvent::Offer { sdp } => {
                let (room, identity) = state.joined()?;
                let out = self.calls.signal(
                    &room,
                    identity,
                    ServerEvent::Offer {
                        from: identity,
                        sdp,
                    },
                )?;
                self.dispatch(&room, out);
                Ok(())
            }
            ClientEvent::Answer { sdp } => {
                let (room, identity) = state.joined()?;
                let out = self.calls.signal(
                    &room,
                    identity,
                    ServerEvent::Answer {
                        from: identity,
                        sdp,
                    },
                )?;
                self.dispatch(&room, out);
                Ok(())
            }
            ClientEvent::IceCandidate { candidate } => {
                let (room, identity) = state.joined()?;
                let out = self.calls.signal(
                    &room,
                    identity,
                    ServerEvent::IceCandidate {
                        from: identity,
                        candidate,
                    },
                )?;
                self.dispatch(&room, out);
                Ok(())
            }
        }
    }

    async fn on_join(
        &self,
        state: &mut ConnectionState,
        room_id: &str,
        identity: &str,
        device_id: String,
        profile: Profile,
    ) -> RelayResult<()> {
        validate::check_room(self.room_id(), room_id)?;
        let identity = validate::parse_identity(identity)?;
        validate::check_id("deviceId", &device_id, self.config.limits.max_id_len)?;
        let profile = validate::sanitize_profile(profile, &self.config.limits);

        // 换身份重新加入时先走离开流程 / switching identity runs the leave path first
        if let Phase::Joined { identity: prev, .. } = &state.phase {
            if *prev != identity {
                self.on_disconnect(&state.handle);
            }
        }

        let session = DeviceSession {
            handle: state.handle.clone(),
            identity,
            device_id: device_id.clone(),
            profile,
            sender: state.sender.clone(),
        };
        let outcome = self.registry.join(room_id, session);
        state.phase = Phase::Joined {
            room_id: room_id.to_string(),
            identity,
            device_id: device_id.clone(),
        };
        info!(
            "✅ {} joined room {} as {} (device {}, first={})",
            state.handle, room_id, identity, device_id, outcome.first_of_identity
        );
        self.sync_on_join(&state.handle, room_id, identity, &device_id, &outcome)
            .await;
        Ok(())
    }

    async fn on_chat(&self, state: &mut ConnectionState, draft: ChatDraft) -> RelayResult<()> {
        let (room, identity) = state.joined()?;
        let now = now_ms();
        let mut message = validate::build_message(&self.config.limits, &room, identity, draft, now)?;
        if !state.dedup.insert(&message.id) {
            debug!("🔁 Duplicate message {} on {}, ignored", message.id, state.handle);
            return Ok(());
        }
        let mode = self.retention_mode(&room).await;
        message.expires_at = mode.expires_at(now);

        match self.gateway.append(&message).await {
            Ok(AppendOutcome::Stored) => {}
            Ok(AppendOutcome::Duplicate) => {
                // 已应用：只把当前状态回给发送连接 / already applied, echo the known status to the origin only
                debug!("🔁 Message {} already stored", message.id);
                if let Ok(Some(existing)) = self.gateway.find_message(&message.id).await {
                    if !existing.deleted {
                        state.reply(&ServerEvent::MessageStatus {
                            ids: vec![existing.id],
                            status: existing.status,
                        });
                    }
                }
                return Ok(());
            }
            Err(e) => warn!("⚠️  Persisting {} failed, relaying anyway: {}", message.id, e),
        }

        let snapshot = self.registry.snapshot(&room);
        let plan = fanout::chat_fanout(&snapshot, &state.handle, &message);
        self.deliver(&snapshot, plan.outbound);

        if plan.delivered {
            if let Err(e) = self.gateway.mark_delivered(&[message.id.clone()]).await {
                warn!("mark_delivered {} failed: {}", message.id, e);
            }
        } else {
            if let Err(e) = self.gateway.queue_pending(&message).await {
                warn!("queue_pending {} failed: {}", message.id, e);
            }
            self.notify_offline(&snapshot, &message);
        }
        Ok(())
    }

    fn on_profile_update(&self, state: &mut ConnectionState, profile: Profile) -> RelayResult<()> {
        let (room, identity) = state.joined()?;
        let profile = validate::sanitize_profile(profile, &self.config.limits);
        self.registry.update_profile(&state.handle, profile.clone());
        self.dispatch(
            &room,
            vec![
                Outbound::new(
                    Audience::Identity(identity.peer()),
                    ServerEvent::ProfileUpdate {
                        identity,
                        profile: profile.clone(),
                    },
                ),
                Outbound::new(
                    Audience::Siblings {
                        of: state.handle.clone(),
                    },
                    ServerEvent::ProfileUpdated { identity, profile },
                ),
            ],
        );
        Ok(())
    }

    async fn on_delete(&self, state: &mut ConnectionState, id: String) -> RelayResult<()> {
        let (room, identity) = state.joined()?;
        validate::check_id("id", &id, self.config.limits.max_id_len)?;
        let deleted = self
            .gateway
            .soft_delete(&room, &[id], Some(identity), now_ms())
            .await?;
        self.dispatch(&room, fanout::deleted_fanout(&deleted));
        Ok(())
    }

    async fn on_wipe(&self, state: &mut ConnectionState) -> RelayResult<()> {
        let (room, identity) = state.joined()?;
        let wiped = self.gateway.wipe_room(&room, identity, now_ms()).await?;
        warn!(
            "🧨 Emergency wipe in room {} by {} ({} messages)",
            room,
            identity,
            wiped.len()
        );
        self.dispatch(
            &room,
            vec![Outbound::new(Audience::Room, ServerEvent::EmergencyWipe { by: identity })],
        );
        Ok(())
    }

    async fn on_set_retention(
        &self,
        state: &mut ConnectionState,
        mode: RetentionMode,
    ) -> RelayResult<()> {
        let (room, identity) = state.joined()?;
        let policy = self
            .gateway
            .set_retention_policy(&room, mode, now_ms())
            .await?;
        info!("🕒 Retention for {} set to {:?} by {}", room, policy.mode, identity);
        self.dispatch(
            &room,
            vec![Outbound::new(
                Audience::Room,
                ServerEvent::RetentionUpdated { mode: policy.mode },
            )],
        );
        Ok(())
    }

    /// 当前保留模式；读失败按 forever 处理 / Current retention mode, forever when the read fails
    pub(crate) async fn retention_mode(&self, room: &str) -> RetentionMode {
        match self.gateway.get_retention_policy(room).await {
            Ok(policy) => policy.mode,
            Err(e) => {
                warn!("retention policy for {} unavailable: {}", room, e);
                RetentionMode::Forever
            }
        }
    }

    /// 连接关闭：注册表离开、下线通知、通话清理
    /// Connection closed: registry leave, offline announcement, call teardown
    pub fn on_disconnect(&self, handle: &str) {
        let Some(out) = self.registry.leave(handle) else {
            return;
        };
        let identity = out.session.identity;
        info!(
            "👋 {} left room {} ({} device {})",
            handle, out.room_id, identity, out.session.device_id
        );
        let device_still_online = out
            .snapshot
            .devices_of(identity)
            .any(|s| s.device_id == out.session.device_id);
        if !device_still_online {
            self.pending_syncs
                .remove(&(out.room_id.clone(), out.session.device_id.clone()));
        }

        let mut outbound = Vec::new();
        if out.last_of_identity {
            outbound.push(Outbound::new(
                Audience::Identity(identity.peer()),
                ServerEvent::PeerLeft { identity },
            ));
        }
        outbound.extend(
            self.calls
                .on_leave(&out.room_id, handle, identity, out.last_of_identity),
        );
        self.deliver(&out.snapshot, outbound);

        if out.room_empty {
            let registry = self.registry.clone();
            let room_id = out.room_id.clone();
            let grace = registry.grace();
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move {
                    tokio::time::sleep(grace).await;
                    registry.collect_if_idle(&room_id);
                });
            }
        }
    }

    /// 按当前快照投递 / Deliver against the current room snapshot
    pub fn dispatch(&self, room_id: &str, outbound: Vec<Outbound>) {
        if outbound.is_empty() {
            return;
        }
        let snapshot = self.registry.snapshot(room_id);
        self.deliver(&snapshot, outbound);
    }

    /// 锁外逐连接写入 / Write to each connection outside the registry lock
    pub fn deliver(&self, snapshot: &RoomSnapshot, outbound: Vec<Outbound>) {
        for item in outbound {
            let targets = fanout::resolve(snapshot, &item.audience);
            if targets.is_empty() {
                continue;
            }
            let text = match serde_json::to_string(&item.event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode outbound event: {}", e);
                    continue;
                }
            };
            for session in targets {
                if session.sender.send(Message::Text(text.clone())).is_err() {
                    debug!("📤 Connection {} already closed", session.handle);
                }
            }
        }
    }

    /// 某身份的全部设备广播投递状态 / Announce a status to every device of an identity
    pub(crate) fn announce_status(
        &self,
        room: &str,
        identity: Identity,
        ids: Vec<String>,
        status: DeliveryStatus,
    ) {
        if ids.is_empty() {
            return;
        }
        self.dispatch(
            room,
            vec![Outbound::new(
                Audience::Identity(identity),
                ServerEvent::MessageStatus { ids, status },
            )],
        );
    }
}
