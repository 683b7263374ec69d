//! 通话信令中继 / Call signaling relay
//!
//! SDP 与 ICE 负载原样转发，不解析 / SDP and ICE payloads are forwarded verbatim, never interpreted

use dashmap::DashMap;
use tracing::info;

use crate::domain::{CallType, Identity, ServerEvent};
use crate::error::{RelayError, RelayResult};
use crate::registry::RoomSnapshot;
use crate::relay::{Audience, Outbound};

/// 房间通话阶段 / Per-room call phase
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallPhase {
    #[default]
    Idle,
    Ringing {
        caller: Identity,
        caller_handle: String,
        call_type: CallType,
    },
    Connected {
        caller: Identity,
        caller_handle: String,
        callee_handle: String,
        call_type: CallType,
    },
}

/// 某身份视角的通话状态 / Call state seen by one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallView {
    Idle,
    Calling,
    Ringing,
    Connected,
}

#[derive(Default)]
pub struct CallRelay {
    rooms: DashMap<String, CallPhase>,
}

impl CallRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, room: &str) -> CallPhase {
        self.rooms.get(room).map(|p| p.clone()).unwrap_or_default()
    }

    pub fn state_for(&self, room: &str, identity: Identity) -> CallView {
        match self.phase(room) {
            CallPhase::Idle => CallView::Idle,
            CallPhase::Ringing { caller, .. } if caller == identity => CallView::Calling,
            CallPhase::Ringing { .. } => CallView::Ringing,
            CallPhase::Connected { .. } => CallView::Connected,
        }
    }

    /// 呼叫只送达对端身份；对端离线返回 PeerUnreachable，通话中回 busy
    /// A call request reaches the peer identity only; an offline peer is PeerUnreachable, an active call answers busy
    pub fn request(
        &self,
        snapshot: &RoomSnapshot,
        origin: &str,
        from: Identity,
        call_type: CallType,
    ) -> RelayResult<Vec<Outbound>> {
        if !snapshot.is_identity_online(from.peer()) {
            return Err(RelayError::PeerUnreachable(from.peer()));
        }
        let mut phase = self.rooms.entry(snapshot.room_id.clone()).or_default();
        if *phase != CallPhase::Idle {
            return Ok(vec![ended_for(origin, "busy")]);
        }
        *phase = CallPhase::Ringing {
            caller: from,
            caller_handle: origin.to_string(),
            call_type,
        };
        info!("📞 {} calling in room {} ({:?})", from, snapshot.room_id, call_type);
        Ok(vec![Outbound::new(
            Audience::Identity(from.peer()),
            ServerEvent::CallRequest { from, call_type },
        )])
    }

    /// 只有被呼叫的身份可以接听 / Only the identity that was rung may accept
    pub fn accept(
        &self,
        room: &str,
        origin: &str,
        from: Identity,
        call_type: CallType,
    ) -> RelayResult<Vec<Outbound>> {
        let mut phase = self.rooms.entry(room.to_string()).or_default();
        let (caller, caller_handle) = match &*phase {
            CallPhase::Ringing {
                caller,
                caller_handle,
                ..
            } if *caller == from.peer() => (*caller, caller_handle.clone()),
            _ => return Err(RelayError::CallState("call-accepted")),
        };
        *phase = CallPhase::Connected {
            caller,
            caller_handle,
            callee_handle: origin.to_string(),
            call_type,
        };
        info!("📞 Call in room {} connected", room);
        Ok(vec![Outbound::new(
            Audience::RoomExcept(origin.to_string()),
            ServerEvent::CallAccepted { from, call_type },
        )])
    }

    /// 无进行中通话时不广播 / Nothing is broadcast when no call is active
    pub fn reject(&self, room: &str, from: Identity) -> Vec<Outbound> {
        if !self.reset(room) {
            return Vec::new();
        }
        vec![Outbound::new(Audience::Room, ServerEvent::CallRejected { from })]
    }

    /// 任一方结束，全房间广播以清除残留响铃 / Either side ends, broadcast so stale ringing UIs clear
    pub fn end(&self, room: &str, from: Identity, reason: Option<&str>) -> Vec<Outbound> {
        if !self.reset(room) {
            return Vec::new();
        }
        vec![Outbound::new(
            Audience::Room,
            ServerEvent::CallEnd {
                from: Some(from),
                reason: reason.map(str::to_string),
            },
        )]
    }

    /// 回到 Idle；返回之前是否有通话 / Back to Idle, true when a call was active
    fn reset(&self, room: &str) -> bool {
        self.rooms
            .insert(room.to_string(), CallPhase::Idle)
            .is_some_and(|prev| prev != CallPhase::Idle)
    }

    /// offer / answer / ice-candidate 转发 / Forward offer, answer and ice-candidate
    pub fn signal(&self, room: &str, from: Identity, event: ServerEvent) -> RelayResult<Vec<Outbound>> {
        let audience = match self.phase(room) {
            CallPhase::Idle => return Err(RelayError::CallState("signaling")),
            CallPhase::Ringing { .. } => Audience::Identity(from.peer()),
            CallPhase::Connected {
                caller,
                caller_handle,
                callee_handle,
                ..
            } => {
                if from == caller {
                    Audience::Connection(callee_handle)
                } else {
                    Audience::Connection(caller_handle)
                }
            }
        };
        Ok(vec![Outbound::new(audience, event)])
    }

    /// 断线视为隐式挂断 / A lost connection is an implicit call-end
    pub fn on_leave(
        &self,
        room: &str,
        handle: &str,
        identity: Identity,
        last_of_identity: bool,
    ) -> Vec<Outbound> {
        let ends = match self.phase(room) {
            CallPhase::Idle => false,
            CallPhase::Ringing {
                caller,
                caller_handle,
                ..
            } => caller_handle == handle || (identity != caller && last_of_identity),
            CallPhase::Connected {
                caller_handle,
                callee_handle,
                ..
            } => caller_handle == handle || callee_handle == handle,
        };
        if !ends {
            return Vec::new();
        }
        info!("📴 Call in room {} ended by disconnect of {}", room, handle);
        self.end(room, identity, Some("disconnected"))
    }
}

/// 只回给发起连接的 call-end / A call-end addressed to the originating connection only
pub fn ended_for(origin: &str, reason: &str) -> Outbound {
    Outbound::new(
        Audience::Connection(origin.to_string()),
        ServerEvent::CallEnd {
            from: None,
            reason: Some(reason.to_string()),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::session;

    fn snapshot(identities: &[(&str, Identity)]) -> RoomSnapshot {
        RoomSnapshot {
            room_id: "main".into(),
            created_at: 0,
            sessions: identities
                .iter()
                .map(|(h, id)| session(h, *id, h).0)
                .collect(),
        }
    }

    #[test]
    fn offline_peer_answers_unavailable() {
        let relay = CallRelay::new();
        let snap = snapshot(&[("a1", Identity::Admin)]);
        let out = relay.request(&snap, "a1", Identity::Admin, CallType::Video);
        assert!(matches!(out, Err(RelayError::PeerUnreachable(Identity::Friend))));
        assert_eq!(relay.phase("main"), CallPhase::Idle);
    }

    #[test]
    fn full_call_lifecycle() {
        let relay = CallRelay::new();
        let snap = snapshot(&[("a1", Identity::Admin), ("b1", Identity::Friend)]);
        let out = relay.request(&snap, "a1", Identity::Admin, CallType::Audio).unwrap();
        assert_eq!(out[0].audience, Audience::Identity(Identity::Friend));
        assert_eq!(relay.state_for("main", Identity::Admin), CallView::Calling);
        assert_eq!(relay.state_for("main", Identity::Friend), CallView::Ringing);

        assert!(relay.accept("main", "a2", Identity::Admin, CallType::Audio).is_err());
        relay.accept("main", "b1", Identity::Friend, CallType::Audio).unwrap();
        assert_eq!(relay.state_for("main", Identity::Admin), CallView::Connected);

        let fwd = relay
            .signal(
                "main",
                Identity::Admin,
                ServerEvent::Offer {
                    from: Identity::Admin,
                    sdp: serde_json::json!({"sdp": "v=0"}),
                },
            )
            .unwrap();
        assert_eq!(fwd[0].audience, Audience::Connection("b1".into()));

        let end = relay.end("main", Identity::Friend, None);
        assert_eq!(end[0].audience, Audience::Room);
        assert_eq!(relay.phase("main"), CallPhase::Idle);
        assert!(relay.signal("main", Identity::Admin, ServerEvent::Pong { timestamp: 0 }).is_err());
    }

    #[test]
    fn second_request_is_busy_and_disconnect_ends_call() {
        let relay = CallRelay::new();
        let snap = snapshot(&[("a1", Identity::Admin), ("b1", Identity::Friend)]);
        relay.request(&snap, "a1", Identity::Admin, CallType::Audio).unwrap();
        let busy = relay.request(&snap, "b1", Identity::Friend, CallType::Audio).unwrap();
        assert!(matches!(&busy[0].event, ServerEvent::CallEnd { reason: Some(r), .. } if r == "busy"));

        assert!(relay.on_leave("main", "zz", Identity::Admin, false).is_empty());
        let out = relay.on_leave("main", "b1", Identity::Friend, true);
        assert_eq!(out.len(), 1);
        assert_eq!(relay.phase("main"), CallPhase::Idle);
    }

    #[test]
    fn reject_and_end_without_a_call_stay_silent() {
        let relay = CallRelay::new();
        assert!(relay.reject("main", Identity::Admin).is_empty());
        assert!(relay.end("main", Identity::Friend, None).is_empty());

        let snap = snapshot(&[("a1", Identity::Admin), ("b1", Identity::Friend)]);
        relay.request(&snap, "a1", Identity::Admin, CallType::Audio).unwrap();
        assert_eq!(relay.reject("main", Identity::Friend).len(), 1);
        assert!(relay.end("main", Identity::Admin, None).is_empty());
    }
}
