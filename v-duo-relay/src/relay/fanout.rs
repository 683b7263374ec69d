//! 纯路由函数：(事件, 房间快照) -> 出站帧
//! Pure routing: (event, room snapshot) -> outbound frames
//!
//! 不做 IO，可脱离网络单测 / no IO, unit-testable without a network

use crate::domain::{DeliveryStatus, Identity, ServerEvent, StoredMessage, WireMessage};
use crate::registry::{DeviceSession, RoomSnapshot};

/// 投递目标 / Delivery audience
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// 单个连接 / One connection
    Connection(String),
    /// 某身份下的某个设备 / One device id of an identity
    Device { identity: Identity, device_id: String },
    /// 身份的全部设备 / Every device of an identity
    Identity(Identity),
    /// 同身份其他设备 / Same identity, excluding the origin connection
    Siblings { of: String },
    /// 整个房间 / The whole room
    Room,
    /// 房间内除某连接外 / The room minus one connection
    RoomExcept(String),
}

/// 一条出站指令 / One outbound instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub audience: Audience,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn new(audience: Audience, event: ServerEvent) -> Self {
        Self { audience, event }
    }
}

/// 解析目标连接 / Resolve an audience against a snapshot
pub fn resolve<'a>(snapshot: &'a RoomSnapshot, audience: &'a Audience) -> Vec<&'a DeviceSession> {
    match audience {
        Audience::Connection(handle) => snapshot.get(handle).into_iter().collect(),
        Audience::Device {
            identity,
            device_id,
        } => snapshot
            .devices_of(*identity)
            .filter(|s| &s.device_id == device_id)
            .collect(),
        Audience::Identity(identity) => snapshot.devices_of(*identity).collect(),
        Audience::Siblings { of } => snapshot.siblings_of(of).collect(),
        Audience::Room => snapshot.sessions.iter().collect(),
        Audience::RoomExcept(handle) => snapshot
            .sessions
            .iter()
            .filter(|s| &s.handle != handle)
            .collect(),
    }
}

/// 聊天消息扇出计划 / Chat message fan-out plan
#[derive(Debug, Clone, PartialEq)]
pub struct ChatFanout {
    pub outbound: Vec<Outbound>,
    /// 对端在线，已送达 / Peer online, status advanced to delivered
    pub delivered: bool,
}

/// 双重标记扇出：兄弟设备 sender=self，对端设备 sender=peer
/// Dual-tagged fan-out: siblings see sender=self, peer devices see sender=peer
pub fn chat_fanout(snapshot: &RoomSnapshot, origin: &str, message: &StoredMessage) -> ChatFanout {
    let sender = message.sender;
    let peer_online = snapshot.is_identity_online(sender.peer());
    let mut outbound = Vec::with_capacity(4);

    outbound.push(Outbound::new(
        Audience::Identity(sender),
        ServerEvent::MessageStatus {
            ids: vec![message.id.clone()],
            status: DeliveryStatus::Sent,
        },
    ));
    outbound.push(Outbound::new(
        Audience::Siblings {
            of: origin.to_string(),
        },
        ServerEvent::ChatMessage {
            message: WireMessage::from_stored(message, sender),
        },
    ));
    if peer_online {
        outbound.push(Outbound::new(
            Audience::Identity(sender.peer()),
            ServerEvent::ChatMessage {
                message: WireMessage::from_stored(message, sender.peer())
                    .with_status(DeliveryStatus::Delivered),
            },
        ));
        outbound.push(Outbound::new(
            Audience::Identity(sender),
            ServerEvent::MessageStatus {
                ids: vec![message.id.clone()],
                status: DeliveryStatus::Delivered,
            },
        ));
    }
    ChatFanout {
        outbound,
        delivered: peer_online,
    }
}

/// 已读回执：广播全房间 / Read receipts go to the whole room
pub fn read_fanout(ids: Vec<String>) -> Option<Outbound> {
    (!ids.is_empty()).then(|| {
        Outbound::new(
            Audience::Room,
            ServerEvent::MessageStatus {
                ids,
                status: DeliveryStatus::Read,
            },
        )
    })
}

/// 每个 id 一条删除事件 / One deletion event per id
pub fn deleted_fanout(ids: &[String]) -> Vec<Outbound> {
    ids.iter()
        .map(|id| Outbound::new(Audience::Room, ServerEvent::MessageDeleted { id: id.clone() }))
        .collect()
}
