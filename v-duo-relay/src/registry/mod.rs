//! 会话注册表 / Session registry
//!
//! 每个房间一把锁（DashMap 分片）；广播只拿快照，不在锁内写网络。
//! One lock per room (DashMap shard); broadcasts work on a snapshot and never write to the network under the lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::domain::{now_ms, Identity, Profile};

/// 连接句柄 / Connection handle
pub type ConnHandle = String;

/// 设备会话 / Device session
#[derive(Clone, Debug)]
pub struct DeviceSession {
    pub handle: ConnHandle,
    pub identity: Identity,
    pub device_id: String,
    pub profile: Profile,
    pub sender: mpsc::UnboundedSender<Message>,
}

struct Room {
    sessions: HashMap<ConnHandle, DeviceSession>,
    created_at: i64,
    empty_since: Option<Instant>,
}

impl Room {
    fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            created_at: now_ms(),
            empty_since: None,
        }
    }

    fn snapshot(&self, room_id: &str) -> RoomSnapshot {
        let mut sessions: Vec<DeviceSession> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.handle.cmp(&b.handle));
        RoomSnapshot {
            room_id: room_id.to_string(),
            created_at: self.created_at,
            sessions,
        }
    }
}

/// 房间快照 / Point-in-time copy of a room
#[derive(Clone, Debug, Default)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub created_at: i64,
    pub sessions: Vec<DeviceSession>,
}

impl RoomSnapshot {
    pub fn get(&self, handle: &str) -> Option<&DeviceSession> {
        self.sessions.iter().find(|s| s.handle == handle)
    }

    /// 指定身份的全部设备 / Every device of `identity`
    pub fn devices_of(&self, identity: Identity) -> impl Iterator<Item = &DeviceSession> {
        self.sessions.iter().filter(move |s| s.identity == identity)
    }

    pub fn peers_of(&self, identity: Identity) -> impl Iterator<Item = &DeviceSession> {
        self.devices_of(identity.peer())
    }

    /// 同身份的其他设备 / Same identity, other devices
    pub fn siblings_of<'a>(&'a self, handle: &'a str) -> impl Iterator<Item = &'a DeviceSession> {
        let identity = self.get(handle).map(|s| s.identity);
        self.sessions
            .iter()
            .filter(move |s| Some(s.identity) == identity && s.handle != handle)
    }

    pub fn is_identity_online(&self, identity: Identity) -> bool {
        self.devices_of(identity).next().is_some()
    }

    /// 最近加入设备的资料 / Profile of the identity's most recent device
    pub fn profile_of(&self, identity: Identity) -> Option<Profile> {
        self.devices_of(identity).last().map(|s| s.profile.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// 加入结果 / Join outcome
#[derive(Debug)]
pub struct JoinOutcome {
    /// 该身份当前唯一在线的设备 / This is the identity's only online device
    pub first_of_identity: bool,
    pub snapshot: RoomSnapshot,
}

/// 离开结果 / Leave outcome
#[derive(Debug)]
pub struct LeaveOutcome {
    pub room_id: String,
    pub session: DeviceSession,
    /// 该身份已无在线设备 / No device of the identity remains online
    pub last_of_identity: bool,
    pub room_empty: bool,
    pub snapshot: RoomSnapshot,
}

/// 会话注册表 / Session registry
pub struct SessionRegistry {
    rooms: DashMap<String, Room>,
    handle_rooms: DashMap<ConnHandle, String>,
    grace: Duration,
}

impl SessionRegistry {
    pub fn new(grace: Duration) -> Self {
        Self {
            rooms: DashMap::new(),
            handle_rooms: DashMap::new(),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// 注册会话；同一句柄重复加入会替换旧条目
    /// Register a session; re-joining with the same handle replaces the old entry
    pub fn join(&self, room_id: &str, session: DeviceSession) -> JoinOutcome {
        if let Some(previous) = self.handle_rooms.get(&session.handle).map(|r| r.clone()) {
            if previous != room_id {
                self.remove_from_room(&previous, &session.handle);
            }
        }
        self.handle_rooms
            .insert(session.handle.clone(), room_id.to_string());

        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(Room::new);
        // 同句柄同身份重复 join 不算新上线 / a repeated join by the same handle and identity is not a new arrival
        let first_of_identity = !room
            .sessions
            .values()
            .any(|s| s.identity == session.identity);
        debug!(
            "🧩 join room={} identity={} device={} handle={}",
            room_id, session.identity, session.device_id, session.handle
        );
        room.sessions.insert(session.handle.clone(), session);
        room.empty_since = None;
        JoinOutcome {
            first_of_identity,
            snapshot: room.snapshot(room_id),
        }
    }

    /// 移除会话；未加入的句柄返回 None / Remove a session, None for handles that never joined
    pub fn leave(&self, handle: &str) -> Option<LeaveOutcome> {
        let (_, room_id) = self.handle_rooms.remove(handle)?;
        self.remove_from_room(&room_id, handle)
    }

    fn remove_from_room(&self, room_id: &str, handle: &str) -> Option<LeaveOutcome> {
        let mut room = self.rooms.get_mut(room_id)?;
        let session = room.sessions.remove(handle)?;
        let last_of_identity = !room
            .sessions
            .values()
            .any(|s| s.identity == session.identity);
        let room_empty = room.sessions.is_empty();
        if room_empty {
            room.empty_since = Some(Instant::now());
        }
        Some(LeaveOutcome {
            room_id: room_id.to_string(),
            session,
            last_of_identity,
            room_empty,
            snapshot: room.snapshot(room_id),
        })
    }

    /// 宽限期到后回收空房间；期间有人重连则保留
    /// Collect an empty room once the grace window has elapsed, keeping it if someone reconnected meanwhile
    pub fn collect_if_idle(&self, room_id: &str) -> bool {
        let grace = self.grace;
        let removed = self
            .rooms
            .remove_if(room_id, |_, room| {
                room.sessions.is_empty()
                    && room
                        .empty_since
                        .is_some_and(|since| since.elapsed() >= grace)
            })
            .is_some();
        if removed {
            info!("🧹 Room {} collected after grace window", room_id);
        }
        removed
    }

    pub fn snapshot(&self, room_id: &str) -> RoomSnapshot {
        self.rooms
            .get(room_id)
            .map(|room| room.snapshot(room_id))
            .unwrap_or_else(|| RoomSnapshot {
                room_id: room_id.to_string(),
                ..RoomSnapshot::default()
            })
    }

    pub fn session(&self, handle: &str) -> Option<DeviceSession> {
        let room_id = self.handle_rooms.get(handle)?.clone();
        let room = self.rooms.get(&room_id)?;
        room.sessions.get(handle).cloned()
    }

    pub fn room_of(&self, handle: &str) -> Option<String> {
        self.handle_rooms.get(handle).map(|r| r.clone())
    }

    pub fn peers_of(&self, room_id: &str, identity: Identity) -> Vec<DeviceSession> {
        self.snapshot(room_id).peers_of(identity).cloned().collect()
    }

    pub fn siblings_of(&self, handle: &str) -> Vec<DeviceSession> {
        let Some(room_id) = self.room_of(handle) else {
            return Vec::new();
        };
        self.snapshot(&room_id).siblings_of(handle).cloned().collect()
    }

    pub fn is_identity_online(&self, room_id: &str, identity: Identity) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|room| room.sessions.values().any(|s| s.identity == identity))
    }

    pub fn update_profile(&self, handle: &str, profile: Profile) -> Option<DeviceSession> {
        let room_id = self.room_of(handle)?;
        let mut room = self.rooms.get_mut(&room_id)?;
        let session = room.sessions.get_mut(handle)?;
        session.profile = profile;
        Some(session.clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.handle_rooms.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn session(
        handle: &str,
        identity: Identity,
        device: &str,
    ) -> (DeviceSession, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            DeviceSession {
                handle: handle.to_string(),
                identity,
                device_id: device.to_string(),
                profile: Profile {
                    name: format!("{}-{}", identity, device),
                    avatar_ref: None,
                },
                sender: tx,
            },
            rx,
        )
    }

    #[test]
    fn second_device_is_not_first_of_identity() {
        let reg = SessionRegistry::new(Duration::from_secs(60));
        let (a1, _r1) = session("c1", Identity::Admin, "d1");
        let (a2, _r2) = session("c2", Identity::Admin, "d2");
        assert!(reg.join("main", a1).first_of_identity);
        let out = reg.join("main", a2);
        assert!(!out.first_of_identity);
        assert_eq!(out.snapshot.sessions.len(), 2);
        assert_eq!(reg.siblings_of("c2").len(), 1);
        assert!(reg.peers_of("main", Identity::Friend).len() == 2);
    }

    #[test]
    fn rejoin_same_handle_replaces_entry() {
        let reg = SessionRegistry::new(Duration::from_secs(60));
        let (a, _r) = session("c1", Identity::Admin, "d1");
        reg.join("main", a.clone());
        let out = reg.join("main", a);
        assert!(!out.first_of_identity);
        assert_eq!(out.snapshot.sessions.len(), 1);
    }

    #[test]
    fn rejoin_same_handle_with_other_identity_counts_as_first() {
        let reg = SessionRegistry::new(Duration::from_secs(60));
        let (a, _ra) = session("c1", Identity::Admin, "d1");
        let (f, _rf) = session("c1", Identity::Friend, "d1");
        reg.join("main", a);
        let out = reg.join("main", f);
        assert!(out.first_of_identity);
        assert!(!reg.is_identity_online("main", Identity::Admin));
    }

    #[test]
    fn leave_reports_last_device_of_identity() {
        let reg = SessionRegistry::new(Duration::from_secs(60));
        let (a1, _r1) = session("c1", Identity::Admin, "d1");
        let (a2, _r2) = session("c2", Identity::Admin, "d2");
        reg.join("main", a1);
        reg.join("main", a2);
        assert!(!reg.leave("c1").unwrap().last_of_identity);
        let out = reg.leave("c2").unwrap();
        assert!(out.last_of_identity);
        assert!(out.room_empty);
        assert!(!reg.is_identity_online("main", Identity::Admin));
        assert!(reg.leave("c2").is_none());
    }

    #[test]
    fn empty_room_survives_until_grace_and_reconnect_cancels() {
        let reg = SessionRegistry::new(Duration::from_secs(60));
        let (a, _r) = session("c1", Identity::Admin, "d1");
        reg.join("main", a.clone());
        reg.leave("c1");
        assert!(!reg.collect_if_idle("main"));
        assert_eq!(reg.room_count(), 1);

        let reg = SessionRegistry::new(Duration::ZERO);
        reg.join("main", a.clone());
        reg.leave("c1");
        reg.join("main", a);
        assert!(!reg.collect_if_idle("main"));
        reg.leave("c1");
        assert!(reg.collect_if_idle("main"));
        assert_eq!(reg.room_count(), 0);
    }
}
